use super::workspace::Workspace;
use crate::error::ToolError;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use tracing::debug;

const MAX_MATCHES_PER_FILE: usize = 10;
const MAX_FILES: usize = 50;
const SHOWN_PER_FILE: usize = 5;
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "build", ".next"];

#[derive(Debug, Default)]
struct FileMatches {
    file: String,
    lines: Vec<(usize, String)>,
}

pub fn search_codebase(workspace: &Workspace, query: &str) -> Result<String, ToolError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ToolError::InvalidArguments {
            tool: "search_codebase".to_string(),
            message: "query must not be empty".to_string(),
        });
    }

    let matches = match search_with_rg(workspace.root(), query) {
        Some(matches) => matches,
        None => search_fallback(workspace, query)?,
    };

    Ok(format_matches(query, &matches))
}

/// Returns `None` when ripgrep is unavailable or fails, so the caller can walk
/// the tree itself.
fn search_with_rg(root: &Path, query: &str) -> Option<Vec<FileMatches>> {
    let mut command = Command::new("rg");
    // Same file set as the walk: no ignore files, hidden files included.
    command.arg("--no-ignore").arg("--hidden");
    for dir in SKIPPED_DIRS {
        command.arg("--glob").arg(format!("!{dir}"));
    }
    let output = match command
        .current_dir(root)
        .arg("--line-number")
        .arg("--no-heading")
        .arg("--color")
        .arg("never")
        .arg("--ignore-case")
        .arg("--fixed-strings")
        .arg("--max-count")
        .arg(MAX_MATCHES_PER_FILE.to_string())
        .arg("--")
        .arg(query)
        .arg(".")
        .output()
    {
        Ok(output) => output,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!("rg not installed, using directory walk");
            return None;
        }
        Err(error) => {
            debug!(%error, "rg failed to start, using directory walk");
            return None;
        }
    };

    match output.status.code() {
        Some(0) => {}
        Some(1) => return Some(Vec::new()),
        _ => {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "rg exited with an error, using directory walk"
            );
            return None;
        }
    }

    Some(group_rg_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Groups `path:line:content` output by file, keeping at most `MAX_FILES`
/// files in first-seen order.
fn group_rg_output(stdout: &str) -> Vec<FileMatches> {
    let mut grouped: Vec<FileMatches> = Vec::new();
    for line in stdout.lines() {
        let Some((file, line_number, content)) = parse_rg_line(line) else {
            continue;
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }

        match grouped.iter().position(|entry| entry.file == file) {
            Some(index) => grouped[index]
                .lines
                .push((line_number, content.to_string())),
            None if grouped.len() < MAX_FILES => grouped.push(FileMatches {
                file: file.to_string(),
                lines: vec![(line_number, content.to_string())],
            }),
            None => {}
        }
    }
    grouped
}

fn parse_rg_line(line: &str) -> Option<(&str, usize, &str)> {
    let (file, rest) = line.split_once(':')?;
    let (number, content) = rest.split_once(':')?;
    let number = number.parse().ok()?;
    Some((file.strip_prefix("./").unwrap_or(file), number, content))
}

fn search_fallback(workspace: &Workspace, query: &str) -> Result<Vec<FileMatches>, ToolError> {
    let needle = query.to_lowercase();
    let mut grouped = Vec::new();
    let mut stack = vec![workspace.root().to_path_buf()];

    while let Some(path) = stack.pop() {
        if grouped.len() >= MAX_FILES {
            break;
        }

        let Ok(file_type) = fs::symlink_metadata(&path).map(|meta| meta.file_type()) else {
            continue;
        };
        if file_type.is_dir() {
            let entries = fs::read_dir(&path).map_err(|error| {
                ToolError::Failed(format!("Failed to read directory {}: {error}", path.display()))
            })?;
            // Symlinks are never followed, so the walk stays inside the root.
            let mut children: Vec<_> = entries
                .filter_map(Result::ok)
                .filter_map(|entry| {
                    let file_type = entry.file_type().ok()?;
                    if file_type.is_symlink() {
                        return None;
                    }
                    let name = entry.file_name();
                    let skipped = file_type.is_dir()
                        && name.to_str().is_some_and(|name| SKIPPED_DIRS.contains(&name));
                    (!skipped).then(|| entry.path())
                })
                .collect();
            // Reverse order so the stack pops entries alphabetically.
            children.sort();
            children.reverse();
            stack.extend(children);
            continue;
        }

        if !file_type.is_file() {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };

        let lines: Vec<(usize, String)> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.to_lowercase().contains(&needle))
            .filter(|(_, line)| !line.trim().is_empty())
            .take(MAX_MATCHES_PER_FILE)
            .map(|(index, line)| (index + 1, line.trim().to_string()))
            .collect();
        if !lines.is_empty() {
            grouped.push(FileMatches {
                file: workspace.display_relative(&path),
                lines,
            });
        }
    }

    Ok(grouped)
}

fn format_matches(query: &str, matches: &[FileMatches]) -> String {
    if matches.is_empty() {
        return format!("No matches found for \"{query}\" in the codebase.");
    }

    let mut output = format!(
        "Found matches for \"{query}\" in {} files:\n\n",
        matches.len()
    );
    for entry in matches {
        output.push_str(&format!("{}:\n", entry.file));
        for (line_number, content) in entry.lines.iter().take(SHOWN_PER_FILE) {
            output.push_str(&format!("  Line {line_number}: {content}\n"));
        }
        if entry.lines.len() > SHOWN_PER_FILE {
            output.push_str(&format!(
                "  ... and {} more matches\n",
                entry.lines.len() - SHOWN_PER_FILE
            ));
        }
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace_with(files: &[(&str, &str)]) -> (TempDir, Workspace) {
        let temp = TempDir::new().expect("temp dir");
        for (name, content) in files {
            let path = temp.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        let workspace = Workspace::new(temp.path().to_path_buf());
        (temp, workspace)
    }

    #[test]
    fn test_fallback_is_case_insensitive_and_skips_build_dirs() {
        let (_temp, workspace) = workspace_with(&[
            ("src/lib.rs", "pub fn Needle() {}\nfn other() {}\n"),
            ("target/debug/out.rs", "needle in build output\n"),
            ("node_modules/pkg/index.js", "needle\n"),
        ]);

        let matches = search_fallback(&workspace, "needle").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file, "src/lib.rs");
        assert_eq!(matches[0].lines, vec![(1, "pub fn Needle() {}".to_string())]);
    }

    #[test]
    fn test_fallback_includes_hidden_and_ignored_files() {
        let (_temp, workspace) = workspace_with(&[
            (".gitignore", "generated.rs\n"),
            (".config/settings.toml", "needle = true\n"),
            ("generated.rs", "// needle\n"),
        ]);

        let matches = search_fallback(&workspace, "needle").unwrap();
        let files: Vec<&str> = matches.iter().map(|entry| entry.file.as_str()).collect();
        assert_eq!(files, vec![".config/settings.toml", "generated.rs"]);
    }

    #[test]
    fn test_fallback_caps_matches_per_file() {
        let body = "hit\n".repeat(25);
        let (_temp, workspace) = workspace_with(&[("many.txt", body.as_str())]);

        let matches = search_fallback(&workspace, "hit").unwrap();
        assert_eq!(matches[0].lines.len(), MAX_MATCHES_PER_FILE);
    }

    #[test]
    fn test_format_truncates_to_five_lines_per_file() {
        let entry = FileMatches {
            file: "a.rs".to_string(),
            lines: (1..=8).map(|n| (n, format!("line {n}"))).collect(),
        };
        let rendered = format_matches("line", &[entry]);

        assert!(rendered.starts_with("Found matches for \"line\" in 1 files:"));
        assert!(rendered.contains("  Line 5: line 5\n"));
        assert!(!rendered.contains("Line 6:"));
        assert!(rendered.contains("... and 3 more matches"));
    }

    #[test]
    fn test_no_matches_message() {
        let (_temp, workspace) = workspace_with(&[("a.txt", "nothing here\n")]);
        let result = search_codebase(&workspace, "zzz_absent_zzz").unwrap();
        assert_eq!(
            result,
            "No matches found for \"zzz_absent_zzz\" in the codebase."
        );
    }

    #[test]
    fn test_rg_output_groups_by_file_in_order() {
        let stdout = "./b.rs:3:  Needle one\n./a.rs:1:needle\n./b.rs:9:needle two\n./a.rs:2:   \nnoise\n";
        let grouped = group_rg_output(stdout);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].file, "b.rs");
        assert_eq!(
            grouped[0].lines,
            vec![(3, "Needle one".to_string()), (9, "needle two".to_string())]
        );
        assert_eq!(grouped[1].file, "a.rs");
        assert_eq!(grouped[1].lines, vec![(1, "needle".to_string())]);
    }

    #[test]
    fn test_rg_output_caps_file_count() {
        let stdout: String = (0..MAX_FILES + 10)
            .map(|n| format!("./f{n}.rs:1:needle\n"))
            .collect();
        let grouped = group_rg_output(&stdout);

        assert_eq!(grouped.len(), MAX_FILES);
        assert_eq!(grouped[MAX_FILES - 1].file, format!("f{}.rs", MAX_FILES - 1));
    }

    #[cfg(unix)]
    #[test]
    fn test_fallback_does_not_follow_symlinks() {
        let outside = TempDir::new().expect("outside dir");
        fs::write(outside.path().join("secret.txt"), "TOPSECRET token\n").unwrap();
        let (temp, workspace) = workspace_with(&[("a.txt", "topsecret local\n")]);
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();
        std::os::unix::fs::symlink(temp.path(), temp.path().join("loop")).unwrap();

        let matches = search_fallback(&workspace, "topsecret").unwrap();
        let files: Vec<&str> = matches.iter().map(|entry| entry.file.as_str()).collect();
        assert_eq!(files, vec!["a.txt"]);
    }

    #[test]
    fn test_parse_rg_line_strips_dot_prefix() {
        assert_eq!(
            parse_rg_line("./src/main.rs:12:fn main() {"),
            Some(("src/main.rs", 12, "fn main() {"))
        );
        assert_eq!(parse_rg_line("garbage"), None);
    }

    #[test]
    fn test_empty_query_is_rejected() {
        let (_temp, workspace) = workspace_with(&[]);
        assert!(search_codebase(&workspace, "  ").is_err());
    }
}
