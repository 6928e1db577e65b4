//! Configuration loading, defaults, and session settings.
//!
//! Resolution is layered: built-in defaults, then an optional TOML config
//! file, then `WEBFORGE_*` environment overrides. Per-session agent settings
//! ([`AgentConfig`]) are built from the loaded [`Config`] plus the request's
//! project root and mode.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the provider base URL.
const ENV_BASE_URL: &str = "WEBFORGE_BASE_URL";
/// Environment variable overriding the provider API key.
const ENV_API_KEY: &str = "WEBFORGE_API_KEY";
/// Environment variable overriding the model identifier.
const ENV_MODEL: &str = "WEBFORGE_MODEL";

// ---------------------------------------------------------------------------
// Agent mode
// ---------------------------------------------------------------------------

/// Safety mode for an agent session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Read-only bias: dangerous commands are refused outright.
    #[default]
    Safe,
    /// File modifications allowed after confirmation.
    Write,
    /// Command execution allowed after confirmation.
    Exec,
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Resource limits applied to a session's tools and step loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Limits {
    /// Maximum model steps per agent turn.
    pub max_steps: u32,
    /// Wall-clock bound for a single tool execution, in milliseconds.
    pub max_tool_time_ms: u64,
    /// Byte cap for a command's buffered output.
    pub max_output_bytes: usize,
    /// Byte cap for files readable by `read_file`.
    pub max_file_bytes: u64,
    /// Hard cap on `search_in_files` results.
    pub max_search_results: usize,
    /// Hard cap on files touched by a single patch.
    pub max_patch_files: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 12,
            max_tool_time_ms: 5 * 60 * 1000,
            max_output_bytes: 1024 * 1024,
            max_file_bytes: 512 * 1024,
            max_search_results: 200,
            max_patch_files: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider settings
// ---------------------------------------------------------------------------

/// Settings for the model-provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible endpoint. Empty means the provider
    /// default is used.
    pub base_url: String,
    /// Bearer token for the endpoint.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Completion token budget per request.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal settings
// ---------------------------------------------------------------------------

/// Tuning knobs for the terminal core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Ring-buffer backlog capacity in bytes.
    pub ring_capacity: usize,
    /// Idle age after which a terminal session is garbage-collected, seconds.
    pub idle_max_age_secs: u64,
    /// Shell binary started for new sessions.
    pub shell: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 64 * 1024,
            idle_max_age_secs: 24 * 60 * 60,
            shell: "/bin/bash".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Loaded service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub limits: Limits,
    pub terminal: TerminalConfig,
}

/// Load configuration: defaults, then the optional TOML file at `path`,
/// then environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) if p.exists() => {
            let raw = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                path: p.to_path_buf(),
                source,
            })?;
            toml::from_str::<Config>(&raw)?
        }
        _ => Config::default(),
    };

    if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
        config.provider.base_url = base_url;
    }
    if let Ok(api_key) = std::env::var(ENV_API_KEY) {
        config.provider.api_key = api_key;
    }
    if let Ok(model) = std::env::var(ENV_MODEL) {
        config.provider.model = model;
    }

    validate(&config)?;
    Ok(config)
}

/// Reject configurations the runtime cannot honor.
fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.limits.max_steps == 0 {
        return Err(ConfigError::OutOfRange {
            field: "limits.max_steps",
            reason: "must be greater than zero",
        });
    }
    if config.terminal.ring_capacity == 0 {
        return Err(ConfigError::OutOfRange {
            field: "terminal.ring_capacity",
            reason: "must be greater than zero",
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-session agent settings
// ---------------------------------------------------------------------------

/// Effective settings for one agent session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Safety mode for this session.
    pub mode: AgentMode,
    /// Resource limits for this session.
    pub limits: Limits,
    /// System prompt. Empty means the orchestrator's default prompt is used.
    pub system_prompt: String,
    /// Absolute project root all tool filesystem access is confined to.
    pub project_root: PathBuf,
}

impl AgentConfig {
    /// Build session settings for a project root using service-wide limits.
    pub fn for_project(config: &Config, mode: AgentMode, project_root: PathBuf) -> Self {
        Self {
            mode,
            limits: config.limits.clone(),
            system_prompt: String::new(),
            project_root,
        }
    }
}
