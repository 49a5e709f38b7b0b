use crate::error::ToolError;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Root that every tool path must stay inside of.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    canonical_root: PathBuf,
}

impl Workspace {
    pub fn new(root: PathBuf) -> Self {
        let canonical_root = fs::canonicalize(&root).unwrap_or_else(|_| root.clone());
        Self {
            root,
            canonical_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a model-supplied path. Relative paths join the root; absolute
    /// paths are accepted only when they already point inside it.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(ToolError::Workspace("empty path".to_string()));
        }
        if trimmed.contains('\\') {
            return Err(ToolError::Workspace(format!(
                "platform-specific path not allowed: {trimmed}"
            )));
        }

        let requested = Path::new(trimmed);
        if requested
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(ToolError::Workspace(format!(
                "path traversal detected: {trimmed}"
            )));
        }

        let joined = if requested.is_absolute() {
            let normalized = normalize(requested);
            if !normalized.starts_with(&self.root) && !normalized.starts_with(&self.canonical_root)
            {
                return Err(ToolError::Workspace(format!(
                    "absolute path outside working directory: {trimmed}"
                )));
            }
            normalized
        } else {
            normalize(&self.root.join(requested))
        };

        self.ensure_within(&joined)?;
        Ok(joined)
    }

    /// Like [`Workspace::resolve`] but maps a missing, blank or `.` path to the root.
    pub fn resolve_or_root(&self, path: Option<&str>) -> Result<PathBuf, ToolError> {
        match path.map(str::trim).filter(|value| !value.is_empty()) {
            None | Some(".") => Ok(self.root.clone()),
            Some(value) => self.resolve(value),
        }
    }

    pub fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .or_else(|_| path.strip_prefix(&self.canonical_root))
            .map(|relative| relative.to_string_lossy().into_owned())
            .unwrap_or_else(|_| path.to_string_lossy().into_owned())
    }

    // Symlinks are followed by canonicalizing the nearest existing ancestor.
    fn ensure_within(&self, path: &Path) -> Result<(), ToolError> {
        let guard = nearest_existing_ancestor(path).ok_or_else(|| {
            ToolError::Workspace(format!(
                "could not find an existing parent of {}",
                path.display()
            ))
        })?;

        let canonical = fs::canonicalize(guard).map_err(|error| {
            ToolError::Workspace(format!("failed to canonicalize {}: {error}", guard.display()))
        })?;
        if !canonical.starts_with(&self.canonical_root) {
            return Err(ToolError::Workspace(format!(
                "path escapes working directory via symlink or traversal: {}",
                path.display()
            )));
        }
        Ok(())
    }
}

fn nearest_existing_ancestor(path: &Path) -> Option<&Path> {
    let mut current = path;
    while !current.exists() {
        current = current.parent()?;
    }
    Some(current)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir | Component::ParentDir => {}
            Component::Normal(segment) => out.push(segment),
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    out
}
