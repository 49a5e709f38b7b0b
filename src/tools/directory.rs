use super::workspace::Workspace;
use crate::error::ToolError;
use glob::Pattern;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_DEPTH: usize = 3;

const DEFAULT_IGNORES: &[&str] = &[
    "node_modules",
    ".git",
    ".DS_Store",
    "*.log",
    "dist",
    "build",
    ".env*",
];
const ALWAYS_IGNORED: &[&str] = &[
    "node_modules",
    ".git",
    "build",
    "dist",
    "target",
    "package-lock.json",
];

#[derive(Debug)]
struct IgnoreRule {
    raw: String,
    glob: Option<Pattern>,
}

impl IgnoreRule {
    fn new(raw: &str) -> Self {
        let raw = raw.trim_start_matches('/').trim_end_matches('/').to_string();
        let glob = if raw.contains(['*', '?', '[']) {
            Pattern::new(&raw).ok()
        } else {
            None
        };
        Self { raw, glob }
    }

    fn matches(&self, relative: &str, name: &str) -> bool {
        if self.raw.is_empty() {
            return false;
        }
        if self.raw == name || self.raw == relative {
            return true;
        }
        if let Some(glob) = &self.glob {
            return glob.matches(relative) || glob.matches(name);
        }
        relative.split('/').any(|part| part == self.raw)
            || relative.starts_with(&format!("{}/", self.raw))
    }
}

#[derive(Debug)]
struct IgnoreRules(Vec<IgnoreRule>);

impl IgnoreRules {
    /// Patterns from the nearest `.gitignore` at or above `start`, or a
    /// default set when none is found, always extended with build output.
    fn discover(start: &Path) -> Self {
        let mut patterns: Vec<String> = start
            .ancestors()
            .map(|dir| dir.join(".gitignore"))
            .find(|candidate| candidate.is_file())
            .and_then(|path| fs::read_to_string(path).ok())
            .map(|content| parse_gitignore(&content))
            .unwrap_or_default();

        if patterns.is_empty() {
            patterns = DEFAULT_IGNORES.iter().map(|p| p.to_string()).collect();
        }
        for always in ALWAYS_IGNORED {
            if !patterns.iter().any(|existing| existing == always) {
                patterns.push(always.to_string());
            }
        }

        Self(patterns.iter().map(|raw| IgnoreRule::new(raw)).collect())
    }

    fn is_ignored(&self, relative: &str, name: &str) -> bool {
        ALWAYS_IGNORED.contains(&name) || self.0.iter().any(|rule| rule.matches(relative, name))
    }
}

// Negations are not supported and are dropped.
fn parse_gitignore(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(str::to_string)
        .collect()
}

#[derive(Debug)]
struct TreeNode {
    name: String,
    is_dir: bool,
    children: Vec<TreeNode>,
}

pub fn directory_structure(
    workspace: &Workspace,
    path: Option<&str>,
    max_depth: Option<usize>,
) -> Result<String, ToolError> {
    let target = workspace.resolve_or_root(path)?;
    let max_depth = max_depth.filter(|depth| *depth > 0).unwrap_or(DEFAULT_MAX_DEPTH);
    let shown = workspace.display_relative(&target);
    let shown = if shown.is_empty() { ".".to_string() } else { shown };

    if !target.exists() {
        return Err(ToolError::Failed(format!("Directory does not exist: {shown}")));
    }
    if !target.is_dir() {
        return Err(ToolError::Failed(format!("Path is not a directory: {shown}")));
    }

    let rules = IgnoreRules::discover(&target);
    let tree = build_tree(&target, &target, &rules, 0, max_depth);
    if tree.is_empty() {
        return Ok(format!(
            "Directory is empty or all contents are ignored: {shown}"
        ));
    }

    let mut lines = Vec::new();
    format_tree(&tree, "", &mut lines);
    Ok(format!(
        "Directory Structure ({shown}):\n{}\n\nShowing {max_depth} levels deep, respecting .gitignore rules",
        lines.join("\n")
    ))
}

fn build_tree(
    base: &Path,
    dir: &Path,
    rules: &IgnoreRules,
    depth: usize,
    max_depth: usize,
) -> Vec<TreeNode> {
    if depth >= max_depth {
        return Vec::new();
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut nodes: Vec<TreeNode> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path: PathBuf = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = path
                .strip_prefix(base)
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| name.clone());
            if rules.is_ignored(&relative, &name) {
                return None;
            }

            // Symlinks are left out so the tree never leaves the workspace.
            let file_type = entry.file_type().ok()?;
            if file_type.is_symlink() {
                return None;
            }
            let is_dir = file_type.is_dir();
            let children = if is_dir {
                build_tree(base, &path, rules, depth + 1, max_depth)
            } else {
                Vec::new()
            };
            Some(TreeNode {
                name,
                is_dir,
                children,
            })
        })
        .collect();

    nodes.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
    nodes
}

fn format_tree(nodes: &[TreeNode], prefix: &str, out: &mut Vec<String>) {
    for (index, node) in nodes.iter().enumerate() {
        let last = index + 1 == nodes.len();
        let connector = if last { "└── " } else { "├── " };
        let suffix = if node.is_dir { "/" } else { "" };
        out.push(format!("{prefix}{connector}{}{suffix}", node.name));

        if !node.children.is_empty() {
            let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
            format_tree(&node.children, &child_prefix, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_listed_or_followed() {
        let outside = TempDir::new().expect("outside dir");
        touch(outside.path(), "private/keys.txt");
        let temp = TempDir::new().expect("temp dir");
        touch(temp.path(), "main.rs");
        std::os::unix::fs::symlink(outside.path(), temp.path().join("escape")).unwrap();
        let workspace = Workspace::new(temp.path().to_path_buf());

        let tree = directory_structure(&workspace, None, None).unwrap();
        assert!(tree.contains("main.rs"));
        assert!(!tree.contains("escape"));
        assert!(!tree.contains("keys.txt"));
    }

    #[test]
    fn test_directories_sort_before_files() {
        let temp = TempDir::new().expect("temp dir");
        touch(temp.path(), "b.txt");
        touch(temp.path(), "a.txt");
        touch(temp.path(), "zeta/inner.rs");
        touch(temp.path(), "alpha/mod.rs");
        let workspace = Workspace::new(temp.path().to_path_buf());

        let tree = directory_structure(&workspace, None, None).unwrap();
        let body: Vec<&str> = tree.lines().skip(1).take(6).collect();
        assert_eq!(
            body,
            vec![
                "├── alpha/",
                "│   └── mod.rs",
                "├── zeta/",
                "│   └── inner.rs",
                "├── a.txt",
                "└── b.txt",
            ]
        );
        assert!(tree.ends_with("Showing 3 levels deep, respecting .gitignore rules"));
    }

    #[test]
    fn test_gitignore_and_always_ignored_entries_are_hidden() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join(".gitignore"), "# comment\n*.tmp\nsecret/\n").unwrap();
        touch(temp.path(), "keep.rs");
        touch(temp.path(), "scratch.tmp");
        touch(temp.path(), "secret/key.pem");
        touch(temp.path(), "target/debug/app");
        touch(temp.path(), "package-lock.json");
        let workspace = Workspace::new(temp.path().to_path_buf());

        let tree = directory_structure(&workspace, None, None).unwrap();
        assert!(tree.contains("keep.rs"));
        assert!(tree.contains(".gitignore"));
        for hidden in ["scratch.tmp", "secret", "target", "package-lock.json"] {
            assert!(!tree.contains(hidden), "{hidden} should be ignored:\n{tree}");
        }
    }

    #[test]
    fn test_max_depth_limits_nesting() {
        let temp = TempDir::new().expect("temp dir");
        touch(temp.path(), "one/two/three/deep.rs");
        let workspace = Workspace::new(temp.path().to_path_buf());

        let tree = directory_structure(&workspace, None, Some(2)).unwrap();
        assert!(tree.contains("two/"));
        assert!(!tree.contains("three"));
    }

    #[test]
    fn test_empty_and_missing_directories() {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir(temp.path().join("empty")).unwrap();
        let workspace = Workspace::new(temp.path().to_path_buf());

        let empty = directory_structure(&workspace, Some("empty"), None).unwrap();
        assert_eq!(empty, "Directory is empty or all contents are ignored: empty");
        assert!(directory_structure(&workspace, Some("nope"), None).is_err());
    }
}
