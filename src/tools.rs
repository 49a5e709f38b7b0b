pub mod context;
pub mod directory;
pub mod patch;
pub mod search;
pub mod workspace;

pub use patch::{
    FailedChange, PatchAction, PatchChange, PatchEngine, PatchReport, PatchRequest,
};
pub use workspace::Workspace;

use crate::error::{PatchError, ToolError};
use crate::types::{ToolCall, ToolDefinition};
use crate::util::{lenient_opt_usize, lenient_usize};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EMPTY_RESULT: &str = "(no output)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    SearchCodebase,
    DirectoryStructure,
    CodeContext,
    PatchFile,
    RollbackPatch,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::SearchCodebase,
        ToolKind::DirectoryStructure,
        ToolKind::CodeContext,
        ToolKind::PatchFile,
        ToolKind::RollbackPatch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::SearchCodebase => "search_codebase",
            Self::DirectoryStructure => "get_directory_structure",
            Self::CodeContext => "get_code_context",
            Self::PatchFile => "patch_file",
            Self::RollbackPatch => "rollback_patch",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name.trim())
    }

    pub fn definition(self) -> ToolDefinition {
        match self {
            Self::SearchCodebase => ToolDefinition::function(
                self.name(),
                "Search the codebase for a string (case-insensitive). Returns matching lines grouped by file.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Text to search for" }
                    },
                    "required": ["query"]
                }),
            ),
            Self::DirectoryStructure => ToolDefinition::function(
                self.name(),
                "Show the directory tree of the project, respecting .gitignore.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Directory to list, relative to the project root" },
                        "maxDepth": { "type": "integer", "description": "Levels to descend (default 3)" }
                    }
                }),
            ),
            Self::CodeContext => ToolDefinition::function(
                self.name(),
                "Show numbered lines around a line of a file. Use before patching to learn exact line numbers.",
                json!({
                    "type": "object",
                    "properties": {
                        "file": { "type": "string" },
                        "lineNumber": { "type": "integer", "description": "1-based target line" },
                        "contextLines": { "type": "integer", "description": "Lines before and after (default 500)" }
                    },
                    "required": ["file", "lineNumber"]
                }),
            ),
            Self::PatchFile => ToolDefinition::function(
                self.name(),
                "Apply line-based changes to a file. Line numbers refer to the file before any change in the request. A backup is written first and its path is returned.",
                json!({
                    "type": "object",
                    "properties": {
                        "file": { "type": "string" },
                        "changes": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "action": { "type": "string", "enum": ["replace", "insert", "delete"] },
                                    "lineStart": { "type": "integer", "description": "1-based first line" },
                                    "lineEnd": { "type": "integer", "description": "1-based last line, inclusive (defaults to lineStart)" },
                                    "content": { "type": "string", "description": "New text for replace and insert" }
                                },
                                "required": ["action", "lineStart"]
                            }
                        }
                    },
                    "required": ["file", "changes"]
                }),
            ),
            Self::RollbackPatch => ToolDefinition::function(
                self.name(),
                "Restore a file from a backup returned by patch_file.",
                json!({
                    "type": "object",
                    "properties": {
                        "file": { "type": "string" },
                        "backupPath": { "type": "string" }
                    },
                    "required": ["file", "backupPath"]
                }),
            ),
        }
    }
}

/// Definitions for every tool, in a stable order.
pub fn catalog() -> Vec<ToolDefinition> {
    ToolKind::ALL.into_iter().map(ToolKind::definition).collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchArgs {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryArgs {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_usize")]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextArgs {
    pub file: String,
    #[serde(deserialize_with = "lenient_usize")]
    pub line_number: usize,
    #[serde(default, deserialize_with = "lenient_opt_usize")]
    pub context_lines: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchArgs {
    pub file: String,
    pub changes: Vec<PatchChange>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackArgs {
    pub file: String,
    pub backup_path: String,
}

/// A tool call with its arguments decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    SearchCodebase(SearchArgs),
    DirectoryStructure(DirectoryArgs),
    CodeContext(ContextArgs),
    PatchFile(PatchArgs),
    RollbackPatch(RollbackArgs),
}

impl ToolRequest {
    pub fn from_call(call: &ToolCall) -> Result<Self, ToolError> {
        let kind = ToolKind::from_name(call.name())
            .ok_or_else(|| ToolError::UnknownTool(call.name().to_string()))?;
        let arguments = call
            .arguments()
            .map_err(|error| invalid_arguments(kind, error))?;

        Ok(match kind {
            ToolKind::SearchCodebase => Self::SearchCodebase(decode(kind, arguments)?),
            ToolKind::DirectoryStructure => Self::DirectoryStructure(decode(kind, arguments)?),
            ToolKind::CodeContext => Self::CodeContext(decode(kind, arguments)?),
            ToolKind::PatchFile => Self::PatchFile(decode(kind, arguments)?),
            ToolKind::RollbackPatch => Self::RollbackPatch(decode(kind, arguments)?),
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::SearchCodebase(_) => ToolKind::SearchCodebase,
            Self::DirectoryStructure(_) => ToolKind::DirectoryStructure,
            Self::CodeContext(_) => ToolKind::CodeContext,
            Self::PatchFile(_) => ToolKind::PatchFile,
            Self::RollbackPatch(_) => ToolKind::RollbackPatch,
        }
    }
}

fn decode<T: DeserializeOwned>(kind: ToolKind, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|error| invalid_arguments(kind, error))
}

fn invalid_arguments(kind: ToolKind, error: serde_json::Error) -> ToolError {
    ToolError::InvalidArguments {
        tool: kind.name().to_string(),
        message: error.to_string(),
    }
}

/// Executes tool calls against one workspace. Every outcome, including
/// failures, comes back as non-empty text for the transcript.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    workspace: Workspace,
    engine: PatchEngine,
}

impl ToolDispatcher {
    pub fn new(working_dir: PathBuf, backup_dir: PathBuf) -> Self {
        Self {
            workspace: Workspace::new(working_dir),
            engine: PatchEngine::new(backup_dir),
        }
    }

    pub fn catalog(&self) -> Vec<ToolDefinition> {
        catalog()
    }

    pub async fn execute(&self, call: &ToolCall) -> String {
        let request = match ToolRequest::from_call(call) {
            Ok(request) => request,
            Err(error) => {
                warn!(tool = call.name(), id = %call.id, %error, "rejected tool call");
                return format!("Error: {error}");
            }
        };

        let kind = request.kind();
        debug!(tool = kind.name(), id = %call.id, "executing tool");
        let dispatcher = self.clone();
        let outcome = match tokio::task::spawn_blocking(move || dispatcher.run(request)).await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(ToolError::Failed(format!(
                "Tool execution task failed for {}: {join_error}",
                kind.name()
            ))),
        };

        let text = match outcome {
            Ok(text) => text,
            Err(error) => {
                warn!(tool = kind.name(), id = %call.id, %error, "tool failed");
                format!("Error: {error}")
            }
        };
        if text.trim().is_empty() {
            EMPTY_RESULT.to_string()
        } else {
            text
        }
    }

    /// Runs a decoded request on the current thread.
    pub fn run(&self, request: ToolRequest) -> Result<String, ToolError> {
        match request {
            ToolRequest::SearchCodebase(args) => {
                search::search_codebase(&self.workspace, &args.query)
            }
            ToolRequest::DirectoryStructure(args) => directory::directory_structure(
                &self.workspace,
                args.path.as_deref(),
                args.max_depth,
            ),
            ToolRequest::CodeContext(args) => context::code_context(
                &self.workspace,
                &args.file,
                args.line_number,
                args.context_lines,
            ),
            ToolRequest::PatchFile(args) => self.patch_file(args),
            ToolRequest::RollbackPatch(args) => self.rollback_patch(args),
        }
    }

    fn patch_file(&self, args: PatchArgs) -> Result<String, ToolError> {
        let request = PatchRequest {
            file: self.workspace.resolve(&args.file)?,
            changes: args.changes,
        };

        match self.engine.apply(&request) {
            Ok(report) => Ok(format!(
                "Successfully applied {} changes to {}\nBackup saved at: {}",
                report.applied_count,
                args.file,
                report.backup_path.display()
            )),
            Err(error) => Ok(render_patch_failure(&args.file, &error)),
        }
    }

    fn rollback_patch(&self, args: RollbackArgs) -> Result<String, ToolError> {
        let target = self.workspace.resolve(&args.file)?;
        let backup = self.resolve_backup(&args.backup_path)?;
        patch::rollback(&backup, &target)?;
        Ok(format!("Successfully rolled back {} from backup", args.file))
    }

    /// Backups may only be read from the engine's backup directory.
    fn resolve_backup(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let requested = Path::new(raw.trim());
        let candidate = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.engine.backup_dir().join(requested)
        };

        let Ok(canonical) = fs::canonicalize(&candidate) else {
            return Err(PatchError::BackupNotFound(candidate).into());
        };
        let backup_root = fs::canonicalize(self.engine.backup_dir())
            .unwrap_or_else(|_| self.engine.backup_dir().to_path_buf());
        if !canonical.starts_with(&backup_root) {
            return Err(ToolError::Workspace(format!(
                "backup path outside backup directory: {raw}"
            )));
        }
        Ok(canonical)
    }
}

fn render_patch_failure(file: &str, error: &PatchError) -> String {
    let mut text = format!("Patch of {file} failed: {error}");
    for failed in error.failed_changes() {
        text.push_str(&format!(
            "\n  Change {} ({} at line {}): {}",
            failed.index + 1,
            failed.change.action,
            failed.change.line_start,
            failed.reason
        ));
    }
    if let Some(backup) = error.backup_path() {
        text.push_str(&format!("\nBackup saved at: {}", backup.display()));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall::new("call_1", name, &arguments)
    }

    #[test]
    fn test_catalog_covers_every_kind_in_order() {
        let names: Vec<&str> = catalog().iter().map(|d| d.function.name).collect();
        assert_eq!(
            names,
            vec![
                "search_codebase",
                "get_directory_structure",
                "get_code_context",
                "patch_file",
                "rollback_patch"
            ]
        );
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_from_call_decodes_camel_case_arguments() {
        let request = ToolRequest::from_call(&call(
            "get_code_context",
            json!({"file": "src/lib.rs", "lineNumber": "12", "contextLines": 4}),
        ))
        .unwrap();

        assert_eq!(
            request,
            ToolRequest::CodeContext(ContextArgs {
                file: "src/lib.rs".to_string(),
                line_number: 12,
                context_lines: Some(4),
            })
        );
    }

    #[test]
    fn test_from_call_rejects_unknown_and_malformed() {
        assert!(matches!(
            ToolRequest::from_call(&call("format_disk", json!({}))),
            Err(ToolError::UnknownTool(_))
        ));
        assert!(matches!(
            ToolRequest::from_call(&call("patch_file", json!({"file": "a.rs"}))),
            Err(ToolError::InvalidArguments { .. })
        ));

        let mut broken = call("search_codebase", json!({}));
        broken.function.arguments = "{not json".to_string();
        assert!(matches!(
            ToolRequest::from_call(&broken),
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_renders_errors_as_text() {
        let temp = TempDir::new().expect("temp dir");
        let dispatcher =
            ToolDispatcher::new(temp.path().to_path_buf(), temp.path().join("backups"));

        let unknown = dispatcher.execute(&call("format_disk", json!({}))).await;
        assert_eq!(unknown, "Error: Unknown tool: format_disk");

        let escape = dispatcher
            .execute(&call("get_code_context", json!({"file": "../etc/passwd", "lineNumber": 1})))
            .await;
        assert!(escape.starts_with("Error: Security error:"), "{escape}");
    }

    #[tokio::test]
    async fn test_patch_then_rollback_through_dispatcher() {
        let temp = TempDir::new().expect("temp dir");
        let backups = temp.path().join("backups");
        fs::write(temp.path().join("notes.txt"), "one\ntwo\nthree").unwrap();
        let dispatcher = ToolDispatcher::new(temp.path().to_path_buf(), backups.clone());

        let patched = dispatcher
            .execute(&call(
                "patch_file",
                json!({
                    "file": "notes.txt",
                    "changes": [{"action": "replace", "lineStart": 2, "content": "TWO"}]
                }),
            ))
            .await;
        assert!(patched.starts_with("Successfully applied 1 changes to notes.txt"));
        assert_eq!(
            fs::read_to_string(temp.path().join("notes.txt")).unwrap(),
            "one\nTWO\nthree"
        );

        let backup_path = patched
            .lines()
            .find_map(|line| line.strip_prefix("Backup saved at: "))
            .expect("backup path in result")
            .to_string();
        let rolled = dispatcher
            .execute(&call(
                "rollback_patch",
                json!({"file": "notes.txt", "backupPath": backup_path}),
            ))
            .await;
        assert_eq!(rolled, "Successfully rolled back notes.txt from backup");
        assert_eq!(
            fs::read_to_string(temp.path().join("notes.txt")).unwrap(),
            "one\ntwo\nthree"
        );
    }

    #[tokio::test]
    async fn test_rollback_refuses_paths_outside_backup_dir() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::write(temp.path().join("fake.backup"), "evil").unwrap();
        let dispatcher =
            ToolDispatcher::new(temp.path().to_path_buf(), temp.path().join("backups"));
        fs::create_dir_all(temp.path().join("backups")).unwrap();

        let result = dispatcher
            .execute(&call(
                "rollback_patch",
                json!({
                    "file": "a.txt",
                    "backupPath": temp.path().join("fake.backup").to_string_lossy()
                }),
            ))
            .await;
        assert!(result.starts_with("Error: Security error:"), "{result}");
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).unwrap(), "a");
    }

    #[test]
    fn test_restore_failure_still_names_backup() {
        let error = PatchError::RestoreFailed {
            failed_changes: Vec::new(),
            backup_path: PathBuf::from("/backups/a.txt.backup-1"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };

        let rendered = render_patch_failure("a.txt", &error);
        assert!(rendered.starts_with("Patch of a.txt failed: Patch failed and the file could not be restored"));
        assert!(rendered.ends_with("\nBackup saved at: /backups/a.txt.backup-1"));
    }

    #[tokio::test]
    async fn test_validation_failure_is_reported_in_result() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("a.txt"), "x\ny").unwrap();
        let dispatcher =
            ToolDispatcher::new(temp.path().to_path_buf(), temp.path().join("backups"));

        let result = dispatcher
            .execute(&call(
                "patch_file",
                json!({"file": "a.txt", "changes": [{"action": "delete", "lineStart": 9}]}),
            ))
            .await;
        assert!(result.starts_with("Patch of a.txt failed: Validation failed:"), "{result}");
        assert!(!temp.path().join("backups").exists());
    }
}
