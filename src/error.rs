//! Unified error types for the agent core.

use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    Parse(toml::de::Error),
    /// A loaded value cannot be honored by the runtime (for example a zero
    /// step budget or a zero-capacity terminal backlog).
    OutOfRange {
        field: &'static str,
        reason: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "cannot read config file {}: {source}", path.display())
            }
            Self::Parse(e) => write!(f, "malformed config file: {e}"),
            Self::OutOfRange { field, reason } => write!(f, "config field {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            Self::OutOfRange { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Errors from the model-provider HTTP layer.
#[derive(Debug)]
pub enum ProviderError {
    /// Network / reqwest-level error.
    Http(reqwest::Error),
    /// Non-2xx status from the API.
    Status {
        code: u16,
        body: String,
        /// Parsed `Retry-After` header, when the server sent one.
        retry_after_secs: Option<u64>,
    },
    /// The response body did not match the expected shape.
    InvalidResponse(String),
    /// The event stream failed mid-flight.
    Stream(String),
}

impl ProviderError {
    /// Build a status error.
    pub fn status(code: u16, body: String, retry_after_secs: Option<u64>) -> Self {
        Self::Status {
            code,
            body,
            retry_after_secs,
        }
    }

    /// HTTP status code when this error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Server-requested retry delay when present.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Status {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "http: {e}"),
            Self::Status { code, body, .. } => write!(f, "status {code}: {body}"),
            Self::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
            Self::Stream(msg) => write!(f, "stream: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

// ---------------------------------------------------------------------------
// AgentError — top-level
// ---------------------------------------------------------------------------

/// Top-level error type for an agent turn.
#[derive(Debug)]
pub enum AgentError {
    Config(ConfigError),
    Provider(ProviderError),
    /// The session referenced by a caller does not exist.
    SessionNotFound(String),
    /// An approval referenced a tool call that is not parked.
    UnknownToolCall(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Provider(e) => write!(f, "provider: {e}"),
            Self::SessionNotFound(id) => write!(f, "no such session: {id}"),
            Self::UnknownToolCall(id) => write!(f, "no parked tool call: {id}"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<ConfigError> for AgentError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ProviderError> for AgentError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}
