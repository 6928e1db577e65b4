//! Uniform tool-result envelope.
//!
//! Every tool returns this JSON shape, and the orchestrator serializes it
//! verbatim into the tool-role message fed back to the model: the model sees
//! exactly what the transport sees.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Typed wire codes carried by failed tool results.
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const TOOL_TIMEOUT: &str = "TOOL_TIMEOUT";
    pub const SIZE_LIMIT_EXCEEDED: &str = "SIZE_LIMIT_EXCEEDED";
    pub const USER_REJECTED: &str = "USER_REJECTED";
    pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";
    pub const INVALID_PATH: &str = "INVALID_PATH";
    pub const NOT_EXECUTABLE: &str = "NOT_EXECUTABLE";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const UNKNOWN_TOOL: &str = "UNKNOWN_TOOL";
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    /// True when the tool ran to completion.
    pub ok: bool,
    /// Tool-specific payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Execution metadata (duration, truncation, digests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResultMeta>,
    /// Typed error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

/// Metadata stamped onto tool results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultMeta {
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: i64,
    /// Set when the payload was cut to fit a size cap.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    /// SHA-256 digest when the tool reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

/// Typed failure carried inside a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolError {
    /// One of the wire codes in [`codes`].
    pub code: String,
    /// Short human-readable message.
    pub message: String,
    /// Optional structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    /// Successful result with a data payload and default metadata.
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            meta: Some(ResultMeta::default()),
            error: None,
        }
    }

    /// Successful result with explicit metadata.
    pub fn success_with_meta(data: serde_json::Value, meta: ResultMeta) -> Self {
        Self {
            ok: true,
            data: Some(data),
            meta: Some(meta),
            error: None,
        }
    }

    /// Failed result carrying a typed error.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::error_with_details(code, message, None)
    }

    /// Failed result with structured error details attached.
    pub fn error_with_details(
        code: &str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            ok: false,
            data: None,
            meta: None,
            error: Some(ToolError {
                code: code.to_string(),
                message: message.into(),
                details,
            }),
        }
    }

    /// Serialize the envelope for the tool-role message content.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"ok":false}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_serializes_without_error_field() {
        let result = ToolResult::success(json!({"entries": []}));
        let value: serde_json::Value = serde_json::from_str(&result.to_wire()).unwrap();
        assert_eq!(value["ok"], true);
        assert!(value.get("error").is_none());
        assert_eq!(value["meta"]["duration_ms"], 0);
        // truncated=false is omitted from the wire
        assert!(value["meta"].get("truncated").is_none());
    }

    #[test]
    fn error_envelope_serializes_without_data_field() {
        let result = ToolResult::error(codes::FILE_NOT_FOUND, "file not found: x.txt");
        let value: serde_json::Value = serde_json::from_str(&result.to_wire()).unwrap();
        assert_eq!(value["ok"], false);
        assert!(value.get("data").is_none());
        assert_eq!(value["error"]["code"], "FILE_NOT_FOUND");
    }

    #[test]
    fn details_survive_serialization() {
        let result = ToolResult::error_with_details(
            codes::SIZE_LIMIT_EXCEEDED,
            "file too large",
            Some(json!({"size": 9000, "max_size": 1024})),
        );
        let value: serde_json::Value = serde_json::from_str(&result.to_wire()).unwrap();
        assert_eq!(value["error"]["details"]["size"], 9000);
    }

    // Verifies encode/decode is lossless for every error code.
    #[test]
    fn envelope_round_trips_all_error_codes() {
        for code in [
            codes::VALIDATION_ERROR,
            codes::FILE_NOT_FOUND,
            codes::PERMISSION_DENIED,
            codes::TOOL_TIMEOUT,
            codes::SIZE_LIMIT_EXCEEDED,
            codes::USER_REJECTED,
            codes::EXECUTION_ERROR,
            codes::INVALID_PATH,
            codes::NOT_EXECUTABLE,
            codes::ALREADY_EXISTS,
            codes::UNKNOWN_TOOL,
        ] {
            let original = ToolResult::error(code, "message");
            let parsed: ToolResult = serde_json::from_str(&original.to_wire()).unwrap();
            assert_eq!(parsed, original, "code: {code}");
        }
    }

    #[test]
    fn success_with_meta_round_trips() {
        let original = ToolResult::success_with_meta(
            json!({"content": "abc"}),
            ResultMeta {
                duration_ms: 12,
                truncated: true,
                sha: Some("deadbeef".into()),
            },
        );
        let parsed: ToolResult = serde_json::from_str(&original.to_wire()).unwrap();
        assert_eq!(parsed, original);
    }
}
