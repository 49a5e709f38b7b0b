//! Line-addressed patching with backup-before-write and restore-on-failure.
//!
//! A request is applied in four steps: validate every change against the
//! file's current numbering, snapshot the file into the backup directory,
//! apply the changes bottom-up in memory, then write the result. Any fault
//! after the snapshot restores the original bytes before returning.

use crate::error::PatchError;
use crate::util::{lenient_opt_usize, lenient_usize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchAction {
    Replace,
    Insert,
    Delete,
}

impl fmt::Display for PatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Replace => "replace",
            Self::Insert => "insert",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchChange {
    pub action: PatchAction,
    #[serde(deserialize_with = "lenient_usize")]
    pub line_start: usize,
    #[serde(
        default,
        deserialize_with = "lenient_opt_usize",
        skip_serializing_if = "Option::is_none"
    )]
    pub line_end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl PatchChange {
    pub fn replace(line_start: usize, line_end: usize, content: impl Into<String>) -> Self {
        Self {
            action: PatchAction::Replace,
            line_start,
            line_end: Some(line_end),
            content: Some(content.into()),
        }
    }

    pub fn insert(line_start: usize, content: impl Into<String>) -> Self {
        Self {
            action: PatchAction::Insert,
            line_start,
            line_end: None,
            content: Some(content.into()),
        }
    }

    pub fn delete(line_start: usize, line_end: usize) -> Self {
        Self {
            action: PatchAction::Delete,
            line_start,
            line_end: Some(line_end),
            content: None,
        }
    }

    fn end_line(&self) -> usize {
        self.line_end.unwrap_or(self.line_start)
    }

    /// Inclusive line range with reversed bounds normalized.
    fn span(&self) -> (usize, usize) {
        let end = self.end_line();
        (self.line_start.min(end), self.line_start.max(end))
    }

    fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|text| !text.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub file: PathBuf,
    pub changes: Vec<PatchChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChange {
    /// Zero-based position of the change in the request.
    pub index: usize,
    pub change: PatchChange,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub file: PathBuf,
    pub applied_count: usize,
    pub backup_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PatchEngine {
    backup_dir: PathBuf,
}

impl PatchEngine {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn apply(&self, request: &PatchRequest) -> Result<PatchReport, PatchError> {
        let path = request.file.as_path();
        if !path.is_file() {
            return Err(PatchError::NotFound(path.to_path_buf()));
        }

        let original = fs::read(path)?;
        let lines = split_lines(path, &original)?;
        validate_changes(&request.changes, lines.len())?;

        self.apply_validated(path, &original, lines, &request.changes)
    }

    fn apply_validated(
        &self,
        path: &Path,
        original: &[u8],
        lines: Vec<String>,
        changes: &[PatchChange],
    ) -> Result<PatchReport, PatchError> {
        let backup_path = self.create_backup(path, original)?;
        debug!(
            file = %path.display(),
            backup = %backup_path.display(),
            changes = changes.len(),
            "backup written"
        );

        let failed_changes = match apply_changes(lines, changes) {
            Ok(patched) => match write_synced(path, patched.join("\n").as_bytes()) {
                Ok(()) => {
                    info!(
                        file = %path.display(),
                        applied = changes.len(),
                        "file patched"
                    );
                    return Ok(PatchReport {
                        file: path.to_path_buf(),
                        applied_count: changes.len(),
                        backup_path,
                    });
                }
                Err(error) => changes
                    .iter()
                    .enumerate()
                    .map(|(index, change)| FailedChange {
                        index,
                        change: change.clone(),
                        reason: format!("write failed: {error}"),
                    })
                    .collect(),
            },
            Err(failed) => failed,
        };

        warn!(
            file = %path.display(),
            failed = failed_changes.len(),
            "patch faulted, restoring from backup"
        );
        if let Err(source) = restore_from_backup(&backup_path, path) {
            warn!(
                file = %path.display(),
                backup = %backup_path.display(),
                %source,
                "restore from backup failed"
            );
            return Err(PatchError::RestoreFailed {
                failed_changes,
                backup_path,
                source,
            });
        }
        Err(PatchError::PartialApply {
            failed_changes,
            backup_path,
        })
    }

    fn create_backup(&self, path: &Path, original: &[u8]) -> Result<PathBuf, PatchError> {
        fs::create_dir_all(&self.backup_dir).map_err(|source| PatchError::Backup {
            path: self.backup_dir.clone(),
            source,
        })?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let stamp = backup_timestamp(Utc::now());
        let mut candidate = self.backup_dir.join(format!("{file_name}.backup-{stamp}"));
        let mut attempt = 1usize;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(mut file) => {
                    let written = file.write_all(original).and_then(|()| file.sync_all());
                    if let Err(source) = written {
                        let _ = fs::remove_file(&candidate);
                        return Err(PatchError::Backup {
                            path: candidate,
                            source,
                        });
                    }
                    return Ok(candidate);
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    candidate = self
                        .backup_dir
                        .join(format!("{file_name}.backup-{stamp}-{attempt}"));
                    attempt += 1;
                }
                Err(source) => {
                    return Err(PatchError::Backup {
                        path: candidate,
                        source,
                    })
                }
            }
        }
    }
}

/// Restores `original_path` from `backup_path` and deletes the backup.
pub fn rollback(backup_path: &Path, original_path: &Path) -> Result<(), PatchError> {
    if !backup_path.is_file() {
        return Err(PatchError::BackupNotFound(backup_path.to_path_buf()));
    }

    restore_from_backup(backup_path, original_path)?;
    fs::remove_file(backup_path)?;
    info!(
        file = %original_path.display(),
        backup = %backup_path.display(),
        "file rolled back"
    );
    Ok(())
}

/// Checks every change individually, then pairwise overlap. Nothing touches
/// the filesystem here.
pub fn validate_changes(changes: &[PatchChange], total_lines: usize) -> Result<(), PatchError> {
    if changes.is_empty() {
        return Err(PatchError::Validation(vec![
            "No changes supplied".to_string()
        ]));
    }

    let errors: Vec<String> = changes
        .iter()
        .enumerate()
        .filter_map(|(index, change)| {
            validate_change(change, total_lines)
                .err()
                .map(|message| format!("Change {}: {message}", index + 1))
        })
        .collect();
    if !errors.is_empty() {
        return Err(PatchError::Validation(errors));
    }

    let overlaps = find_overlaps(changes);
    if !overlaps.is_empty() {
        return Err(PatchError::Validation(overlaps));
    }

    Ok(())
}

fn validate_change(change: &PatchChange, total_lines: usize) -> Result<(), String> {
    let start = change.line_start;
    let max_start = match change.action {
        PatchAction::Insert => total_lines + 1,
        PatchAction::Replace | PatchAction::Delete => total_lines,
    };
    if start < 1 || start > max_start {
        return Err(format!(
            "Invalid lineStart: {start}. Must be between 1 and {max_start}"
        ));
    }

    if matches!(change.action, PatchAction::Replace | PatchAction::Delete) {
        let end = change.end_line();
        if end < start {
            return Err(format!(
                "Invalid range: lineEnd ({end}) must be >= lineStart ({start})"
            ));
        }
        if end > total_lines {
            return Err(format!("Invalid lineEnd: {end}. Must be <= {total_lines}"));
        }
    }

    match change.action {
        PatchAction::Delete if change.text().is_some() => {
            Err("delete operation should not have content".to_string())
        }
        PatchAction::Replace | PatchAction::Insert if change.text().is_none() => {
            Err(format!("{} operation requires content", change.action))
        }
        _ => Ok(()),
    }
}

// Adjacent ranges are legal; only a shared line counts as overlap.
fn find_overlaps(changes: &[PatchChange]) -> Vec<String> {
    let mut overlaps = Vec::new();
    for (i, first) in changes.iter().enumerate() {
        let (start1, end1) = first.span();
        for (j, second) in changes.iter().enumerate().skip(i + 1) {
            let (start2, end2) = second.span();
            if end1 >= start2 && end2 >= start1 {
                overlaps.push(format!(
                    "Changes overlap: Change {} (lines {start1}-{end1}) and Change {} (lines {start2}-{end2})",
                    i + 1,
                    j + 1
                ));
            }
        }
    }
    overlaps
}

/// Applies changes from the highest `line_start` down so that line numbers
/// computed against the original file stay valid for every change not yet
/// applied.
fn apply_changes(
    mut lines: Vec<String>,
    changes: &[PatchChange],
) -> Result<Vec<String>, Vec<FailedChange>> {
    let mut order: Vec<usize> = (0..changes.len()).collect();
    order.sort_by_key(|&index| Reverse(changes[index].line_start));

    let mut failed = Vec::new();
    for index in order {
        let change = &changes[index];
        if let Err(reason) = apply_change(&mut lines, change) {
            failed.push(FailedChange {
                index,
                change: change.clone(),
                reason,
            });
        }
    }

    if failed.is_empty() {
        Ok(lines)
    } else {
        failed.sort_by_key(|failure| failure.index);
        Err(failed)
    }
}

fn apply_change(lines: &mut Vec<String>, change: &PatchChange) -> Result<(), String> {
    let start = change
        .line_start
        .checked_sub(1)
        .ok_or_else(|| "lineStart must be >= 1".to_string())?;

    match change.action {
        PatchAction::Replace => {
            let end = checked_range_end(lines.len(), start, change.end_line())?;
            let text = change
                .text()
                .ok_or_else(|| "replace operation requires content".to_string())?;
            lines.splice(start..end, text.split('\n').map(str::to_string));
        }
        PatchAction::Insert => {
            if start > lines.len() {
                return Err(format!(
                    "insert position {} is past end of file ({} lines)",
                    change.line_start,
                    lines.len()
                ));
            }
            let text = change
                .text()
                .ok_or_else(|| "insert operation requires content".to_string())?;
            lines.splice(start..start, text.split('\n').map(str::to_string));
        }
        PatchAction::Delete => {
            let end = checked_range_end(lines.len(), start, change.end_line())?;
            lines.drain(start..end);
        }
    }
    Ok(())
}

fn checked_range_end(total: usize, start: usize, line_end: usize) -> Result<usize, String> {
    if line_end <= start || line_end > total {
        return Err(format!(
            "lines {}-{line_end} are outside the file ({total} lines)",
            start + 1
        ));
    }
    Ok(line_end)
}

fn split_lines(path: &Path, bytes: &[u8]) -> Result<Vec<String>, PatchError> {
    let text = std::str::from_utf8(bytes).map_err(|error| {
        io::Error::new(
            ErrorKind::InvalidData,
            format!("{} is not valid UTF-8: {error}", path.display()),
        )
    })?;
    Ok(text.split('\n').map(str::to_string).collect())
}

fn restore_from_backup(backup_path: &Path, target: &Path) -> io::Result<()> {
    let bytes = fs::read(backup_path)?;
    write_synced(target, &bytes)
}

/// Replaces `path` with `bytes` through a synced sibling file and a rename,
/// so the target is either the old contents or the new ones, never a mix.
fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let (staging, mut file) = create_staging_file(path)?;
    let written = file
        .write_all(bytes)
        .and_then(|()| file.sync_all())
        .and_then(|()| {
            if let Ok(meta) = fs::metadata(path) {
                fs::set_permissions(&staging, meta.permissions())?;
            }
            fs::rename(&staging, path)
        });
    if written.is_err() {
        let _ = fs::remove_file(&staging);
    }
    written
}

fn create_staging_file(path: &Path) -> io::Result<(PathBuf, File)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let mut attempt = 0usize;
    loop {
        let candidate = parent.join(format!(".{name}.spectre-{}-{attempt}", std::process::id()));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(error) => return Err(error),
        }
    }
}

fn backup_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}
