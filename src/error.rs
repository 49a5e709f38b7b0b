//! Typed failures for each boundary of the agent.
//!
//! The patch engine, backend client and tool dispatcher report every failure
//! through these enums; `anyhow` is only used at the application edge.

use std::path::PathBuf;
use thiserror::Error;

use crate::tools::patch::FailedChange;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("File does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Backup file not found: {}", .0.display())]
    BackupNotFound(PathBuf),

    #[error("Validation failed:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    #[error(
        "Patch failed. {} changes could not be applied. File restored from backup.",
        failed_changes.len()
    )]
    PartialApply {
        failed_changes: Vec<FailedChange>,
        backup_path: PathBuf,
    },

    #[error(
        "Patch failed and the file could not be restored: {source}. Original contents are in {}",
        backup_path.display()
    )]
    RestoreFailed {
        failed_changes: Vec<FailedChange>,
        backup_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not create backup at {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Patch operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl PatchError {
    pub fn failed_changes(&self) -> &[FailedChange] {
        match self {
            Self::PartialApply { failed_changes, .. }
            | Self::RestoreFailed { failed_changes, .. } => failed_changes,
            _ => &[],
        }
    }

    pub fn backup_path(&self) -> Option<&PathBuf> {
        match self {
            Self::PartialApply { backup_path, .. }
            | Self::RestoreFailed { backup_path, .. } => Some(backup_path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Request cancelled by user")]
    Cancelled,

    #[error("cannot reach backend at '{url}': {message}")]
    Unreachable { url: String, message: String },

    #[error("request to '{url}' failed: {message}")]
    Network { url: String, message: String },

    #[error("backend '{url}' returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Security error: {0}")]
    Workspace(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Patch(#[from] PatchError),
}
