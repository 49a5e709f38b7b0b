use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::util::parse_bool_str;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_CONTEXT_LIMIT: usize = 1500;
pub const DEFAULT_MODEL: &str = "local-model";
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;
const MAX_TOKENS_CEILING: u32 = 32_768;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub api_base_url: String,
    pub context_limit: usize,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub max_tool_rounds: usize,
    pub backup_dir: PathBuf,
    pub session_dir: PathBuf,
    pub log_path: Option<PathBuf>,
    pub debug: bool,
    pub working_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let working_dir = std::env::current_dir().context("Failed to read current directory")?;
        Self::from_lookup(working_dir, |key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source. `load` passes the
    /// process environment.
    pub fn from_lookup<F>(working_dir: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_base_url = var("LLAMA_HOST_URI")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let backup_dir = var("SPECTRE_BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| working_dir.clone())
                    .join(".spectre")
                    .join("backups")
            });
        let session_dir = var("SPECTRE_SESSION_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| working_dir.join(".spectre"));
        let max_tokens: u32 = parse_var(&var, "SPECTRE_MAX_TOKENS", DEFAULT_MAX_TOKENS)?;

        Ok(Self {
            api_base_url,
            context_limit: parse_var(&var, "LLAMA_CONTEXT_LIMIT", DEFAULT_CONTEXT_LIMIT)?,
            model: var("SPECTRE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.clamp(1, MAX_TOKENS_CEILING),
            temperature: parse_var(&var, "SPECTRE_TEMPERATURE", 0.7)?,
            top_k: parse_var(&var, "SPECTRE_TOP_K", 40)?,
            top_p: parse_var(&var, "SPECTRE_TOP_P", 0.9)?,
            repeat_penalty: parse_var(&var, "SPECTRE_REPEAT_PENALTY", 1.1)?,
            max_tool_rounds: parse_var(&var, "SPECTRE_MAX_TOOL_ROUNDS", DEFAULT_MAX_TOOL_ROUNDS)?,
            backup_dir,
            session_dir,
            log_path: var("SPECTRE_LOG_PATH").map(PathBuf::from),
            debug: var("DEBUG")
                .and_then(|value| parse_bool_str(&value))
                .unwrap_or(false),
            working_dir,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            bail!(
                "Invalid LLAMA_HOST_URI '{}': expected http:// or https:// URL",
                self.api_base_url
            );
        }
        if self.context_limit == 0 {
            bail!("LLAMA_CONTEXT_LIMIT must be greater than zero");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!(
                "SPECTRE_TEMPERATURE must be between 0 and 2 (got {})",
                self.temperature
            );
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            bail!("SPECTRE_TOP_P must be in (0, 1] (got {})", self.top_p);
        }
        if self.repeat_penalty <= 0.0 {
            bail!(
                "SPECTRE_REPEAT_PENALTY must be positive (got {})",
                self.repeat_penalty
            );
        }
        if self.max_tool_rounds == 0 {
            bail!("SPECTRE_MAX_TOOL_ROUNDS must be at least 1");
        }
        Ok(())
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.api_base_url)
    }

    pub fn models_url(&self) -> String {
        format!("{}/v1/models", self.api_base_url)
    }
}

fn parse_var<T, V>(var: &V, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|error| anyhow::anyhow!("Invalid {key} '{raw}': {error}")),
    }
}
