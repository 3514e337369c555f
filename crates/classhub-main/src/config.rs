use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use classhub_ai::{
    CredentialPolicy, GeminiConfig, DEFAULT_CHAT_MODEL, DEFAULT_GEMINI_BASE_URL,
    DEFAULT_VIDEO_MODEL, DEFAULT_POLL_INTERVAL,
};
use serde::Deserialize;
use thiserror::Error;

use crate::home::{classhub_config_path, expand_path_with_home};

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {} failed: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse {} failed: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClasshubToml {
    pub gemini: GeminiSection,
    pub generation: GenerationSection,
    pub credential: CredentialSection,
    pub log: LogSection,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GeminiSection {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub chat_model: Option<String>,
    pub video_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    pub poll_interval_ms: Option<u64>,
    pub max_poll_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CredentialSection {
    pub policy: Option<CredentialPolicy>,
    pub expired_phrases: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub path: Option<String>,
    pub level: Option<String>,
    pub stdout: Option<bool>,
}

/// Settings after `$VAR` references and defaults are applied.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub gemini: GeminiConfig,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub max_poll_attempts: Option<u32>,
    pub credential_policy: CredentialPolicy,
    pub expired_phrases: Vec<String>,
    pub log: RuntimeLogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLogConfig {
    pub dir: PathBuf,
    pub level: String,
    pub stdout: bool,
}

/// Reads `classhub.toml` from `home`. A missing file yields defaults.
pub fn load_classhub_toml(home: &Path) -> Result<ClasshubToml, ConfigError> {
    let path = classhub_config_path(home);
    if !path.exists() {
        return Ok(ClasshubToml::default());
    }
    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
}

pub fn load_runtime_config(home: &Path) -> Result<RuntimeConfig, ConfigError> {
    let parsed = load_classhub_toml(home)?;
    build_runtime_config(&parsed, home)
}

pub fn build_runtime_config(parsed: &ClasshubToml, home: &Path) -> Result<RuntimeConfig, ConfigError> {
    let env_map = &parsed.env;
    let gemini = &parsed.gemini;

    let base_url = resolve_or(gemini.base_url.as_deref(), env_map, DEFAULT_GEMINI_BASE_URL);
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Invalid {
            field: "gemini.base_url",
            message: format!("expected an http(s) URL, got `{base_url}`"),
        });
    }

    if parsed.generation.poll_interval_ms == Some(0) {
        return Err(ConfigError::Invalid {
            field: "generation.poll_interval_ms",
            message: "must be at least 1; omit it for the 5000 ms default".to_string(),
        });
    }
    let poll_interval = parsed
        .generation
        .poll_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_POLL_INTERVAL);
    if parsed.generation.max_poll_attempts == Some(0) {
        return Err(ConfigError::Invalid {
            field: "generation.max_poll_attempts",
            message: "must be at least 1; omit it to poll until the job finishes".to_string(),
        });
    }

    Ok(RuntimeConfig {
        gemini: GeminiConfig {
            base_url,
            chat_model: resolve_or(gemini.chat_model.as_deref(), env_map, DEFAULT_CHAT_MODEL),
            video_model: resolve_or(gemini.video_model.as_deref(), env_map, DEFAULT_VIDEO_MODEL),
        },
        api_key: gemini
            .api_key
            .as_deref()
            .and_then(|value| resolve_config_value(value, env_map)),
        poll_interval,
        max_poll_attempts: parsed.generation.max_poll_attempts,
        credential_policy: parsed.credential.policy.unwrap_or_default(),
        expired_phrases: parsed
            .credential
            .expired_phrases
            .iter()
            .map(|phrase| phrase.trim().to_string())
            .filter(|phrase| !phrase.is_empty())
            .collect(),
        log: build_runtime_log_config(&parsed.log, env_map, home),
    })
}

fn build_runtime_log_config(
    log: &LogSection,
    env_map: &HashMap<String, String>,
    home: &Path,
) -> RuntimeLogConfig {
    let dir = log
        .path
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .map(|value| expand_path_with_home(Path::new(&value)))
        .unwrap_or_else(|| home.join("logs"));
    RuntimeLogConfig {
        dir,
        level: resolve_or(log.level.as_deref(), env_map, DEFAULT_LOG_LEVEL),
        stdout: log.stdout.unwrap_or(false),
    }
}

fn resolve_or(value: Option<&str>, env_map: &HashMap<String, String>, default: &str) -> String {
    value
        .and_then(|value| resolve_config_value(value, env_map))
        .unwrap_or_else(|| default.to_string())
}

/// `$NAME` reads from `[env]` first, then the process environment.
fn resolve_config_value(value: &str, env_map: &HashMap<String, String>) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(env_key) = trimmed.strip_prefix('$') {
        return env_map
            .get(env_key)
            .cloned()
            .or_else(|| std::env::var(env_key).ok())
            .map(|resolved| resolved.trim().to_string())
            .filter(|resolved| !resolved.is_empty());
    }
    Some(trimmed.to_string())
}
