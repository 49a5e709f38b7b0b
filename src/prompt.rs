use std::fs;
use std::path::Path;
use tracing::debug;

pub const PROMPT_FILE: &str = "prompt.md";

/// Reads `prompt.md` from the working directory and fills in its
/// `{{VARIABLE}}` placeholders, or falls back to a built-in prompt.
pub fn load_system_prompt(working_dir: &Path, api_base_url: &str) -> String {
    let path = working_dir.join(PROMPT_FILE);
    match fs::read_to_string(&path) {
        Ok(template) => render_template(&template, working_dir, api_base_url),
        Err(error) => {
            debug!(path = %path.display(), %error, "using built-in system prompt");
            fallback_prompt(working_dir)
        }
    }
}

pub fn render_template(template: &str, working_dir: &Path, api_base_url: &str) -> String {
    let project_name = working_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let working_dir = working_dir.display().to_string();

    [
        ("WORKING_DIRECTORY", working_dir.as_str()),
        ("API_BASE_URL", api_base_url),
        ("PROJECT_NAME", project_name.as_str()),
    ]
    .into_iter()
    .fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{{{key}}}}}"), value)
    })
}

fn fallback_prompt(working_dir: &Path) -> String {
    format!(
        "You are Spectre, an AI coding agent. You have access to tools for searching, reading and patching files in {}.",
        working_dir.display()
    )
}
