//! Transport-facing event fabric.
//!
//! Events are transport-agnostic records correlated by session id and, for
//! tool calls and commands, by the `id` field (tool-call id or command
//! handle). The orchestrator and the command tools emit these toward a
//! caller-supplied sink; the WebSocket layer forwards them verbatim.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Wire names for every event the core emits.
pub mod event_types {
    pub const TOOL_CALL: &str = "tool.call";
    pub const TOOL_APPROVAL_REQUIRED: &str = "tool.approval_required";
    pub const TOOL_RESULT: &str = "tool.result";
    pub const TOOL_ERROR: &str = "tool.error";
    pub const COMMAND_OUTPUT: &str = "command.output";
    pub const COMMAND_DONE: &str = "command.done";
    pub const ASSISTANT_DELTA: &str = "assistant.delta";
    pub const ASSISTANT_THINKING: &str = "assistant.thinking";
    pub const ASSISTANT_FINAL: &str = "assistant.final";
    pub const AGENT_DONE: &str = "agent.done";
    pub const AGENT_ERROR: &str = "agent.error";
}

/// One event on its way to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEvent {
    /// Dotted wire name from [`event_types`].
    #[serde(rename = "type")]
    pub event_type: String,
    /// Owning agent session.
    pub session_id: String,
    /// Project the session operates on.
    pub project_id: String,
    /// Wall-clock emission time, unix milliseconds.
    pub ts: u64,
    /// Correlation id: tool-call id or command handle, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Event-specific payload.
    pub payload: serde_json::Value,
}

impl AgentEvent {
    fn new(
        event_type: &str,
        session_id: Uuid,
        project_id: Uuid,
        id: Option<String>,
        payload: impl Serialize,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            session_id: session_id.to_string(),
            project_id: project_id.to_string(),
            ts: now_unix_millis(),
            id,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of `tool.call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallPayload {
    /// Provider-assigned tool-call id.
    pub id: String,
    /// Requested tool name.
    pub name: String,
    /// Parsed argument object.
    pub arguments: serde_json::Value,
}

/// Payload of `tool.approval_required`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolApprovalPayload {
    /// Provider-assigned tool-call id.
    pub id: String,
    /// Requested tool name.
    pub name: String,
    /// Parsed argument object.
    pub arguments: serde_json::Value,
    /// Short human sentence describing the call.
    pub summary: String,
    /// Policy decision that triggered the pause (always `confirm`).
    pub policy: String,
}

/// Payload of `tool.result`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultPayload {
    /// Provider-assigned tool-call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Whether the tool succeeded.
    pub ok: bool,
    /// Tool-specific payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Typed error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::tools::ToolError>,
    /// Wall-clock execution time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// Payload of `command.output`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandOutputPayload {
    /// Command handle.
    pub handle: String,
    /// Source stream: `stdout` or `stderr`.
    pub stream: String,
    /// One scanned output line.
    pub text: String,
    /// Capture time, unix milliseconds.
    pub ts: u64,
}

/// Payload of `command.done`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandDonePayload {
    /// Command handle.
    pub handle: String,
    /// Final exit code; -1 for killed/cancelled commands.
    pub exit_code: i32,
}

/// Payload of `assistant.delta` / `assistant.thinking` / `assistant.final`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantTextPayload {
    /// Text content (a delta for the streaming kinds, full text for final).
    pub content: String,
    /// False on deltas, true on the final event.
    pub done: bool,
}

/// Payload of `agent.done`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDonePayload {
    /// Steps consumed by the turn.
    pub steps: u32,
    /// Closing status sentence.
    pub final_message: String,
}

/// Payload of `agent.error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentErrorPayload {
    /// Stable error code (for example `STREAM_ERROR`).
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

pub fn new_tool_call_event(session: Uuid, project: Uuid, payload: ToolCallPayload) -> AgentEvent {
    let id = payload.id.clone();
    AgentEvent::new(event_types::TOOL_CALL, session, project, Some(id), payload)
}

pub fn new_tool_approval_event(
    session: Uuid,
    project: Uuid,
    payload: ToolApprovalPayload,
) -> AgentEvent {
    let id = payload.id.clone();
    AgentEvent::new(
        event_types::TOOL_APPROVAL_REQUIRED,
        session,
        project,
        Some(id),
        payload,
    )
}

pub fn new_tool_result_event(
    session: Uuid,
    project: Uuid,
    payload: ToolResultPayload,
) -> AgentEvent {
    let id = payload.id.clone();
    AgentEvent::new(event_types::TOOL_RESULT, session, project, Some(id), payload)
}

pub fn new_tool_error_event(
    session: Uuid,
    project: Uuid,
    tool_call_id: &str,
    error: crate::tools::ToolError,
) -> AgentEvent {
    AgentEvent::new(
        event_types::TOOL_ERROR,
        session,
        project,
        Some(tool_call_id.to_string()),
        serde_json::json!({ "error": error }),
    )
}

pub fn new_command_output_event(
    session: Uuid,
    project: Uuid,
    payload: CommandOutputPayload,
) -> AgentEvent {
    let id = payload.handle.clone();
    AgentEvent::new(
        event_types::COMMAND_OUTPUT,
        session,
        project,
        Some(id),
        payload,
    )
}

pub fn new_command_done_event(
    session: Uuid,
    project: Uuid,
    payload: CommandDonePayload,
) -> AgentEvent {
    let id = payload.handle.clone();
    AgentEvent::new(event_types::COMMAND_DONE, session, project, Some(id), payload)
}

pub fn new_assistant_delta_event(session: Uuid, project: Uuid, delta: &str) -> AgentEvent {
    AgentEvent::new(
        event_types::ASSISTANT_DELTA,
        session,
        project,
        None,
        AssistantTextPayload {
            content: delta.to_string(),
            done: false,
        },
    )
}

pub fn new_assistant_thinking_event(session: Uuid, project: Uuid, delta: &str) -> AgentEvent {
    AgentEvent::new(
        event_types::ASSISTANT_THINKING,
        session,
        project,
        None,
        AssistantTextPayload {
            content: delta.to_string(),
            done: false,
        },
    )
}

/// Lifecycle marker for the completed assistant message. Consumers that
/// persist text should treat `chunk` frames as authoritative and this event
/// as a marker only.
pub fn new_assistant_final_event(session: Uuid, project: Uuid, content: &str) -> AgentEvent {
    AgentEvent::new(
        event_types::ASSISTANT_FINAL,
        session,
        project,
        None,
        AssistantTextPayload {
            content: content.to_string(),
            done: true,
        },
    )
}

pub fn new_agent_done_event(session: Uuid, project: Uuid, payload: AgentDonePayload) -> AgentEvent {
    AgentEvent::new(event_types::AGENT_DONE, session, project, None, payload)
}

pub fn new_agent_error_event(
    session: Uuid,
    project: Uuid,
    payload: AgentErrorPayload,
) -> AgentEvent {
    AgentEvent::new(event_types::AGENT_ERROR, session, project, None, payload)
}

// ---------------------------------------------------------------------------
// Inbound transport frames
// ---------------------------------------------------------------------------

/// Frames the transport delivers to the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start or continue an agent turn with user text.
    SendMessage { payload: SendMessagePayload },
    /// Resolve a parked tool call.
    ApproveTool { payload: ApproveToolPayload },
    /// Cancel the running turn.
    Stop,
}

/// Payload of the `send_message` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendMessagePayload {
    pub content: String,
}

/// Payload of the `approve_tool` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApproveToolPayload {
    pub tool_call_id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversation bookkeeping frames
// ---------------------------------------------------------------------------

/// Outbound frames for conversation-side persistence. `chunk` is the
/// authoritative stream for assistant text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookkeepingFrame {
    /// A conversation message row was created.
    MessageCreated { payload: MessageCreatedPayload },
    /// A slice of assistant text for an in-flight message.
    Chunk { payload: ChunkPayload },
}

/// Payload of the `message_created` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageCreatedPayload {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub created_at: u64,
}

/// Payload of the `chunk` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPayload {
    pub message_id: String,
    pub content: String,
    pub done: bool,
}

/// Current wall-clock unix timestamp in milliseconds.
pub(crate) fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_event_carries_wire_type_and_correlation_id() {
        let event = new_tool_call_event(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ToolCallPayload {
                id: "call_1".into(),
                name: "list_dir".into(),
                arguments: json!({"path": "."}),
            },
        );
        assert_eq!(event.event_type, "tool.call");
        assert_eq!(event.id.as_deref(), Some("call_1"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool.call");
        assert_eq!(value["payload"]["name"], "list_dir");
        assert!(value["ts"].as_u64().is_some());
    }

    #[test]
    fn assistant_delta_event_omits_id() {
        let event = new_assistant_delta_event(Uuid::new_v4(), Uuid::new_v4(), "Hel");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "assistant.delta");
        assert!(value.get("id").is_none());
        assert_eq!(value["payload"]["content"], "Hel");
        assert_eq!(value["payload"]["done"], false);
    }

    #[test]
    fn agent_done_event_payload_shape() {
        let event = new_agent_done_event(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AgentDonePayload {
                steps: 12,
                final_message: "Agent stopped: maximum steps reached".into(),
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"]["steps"], 12);
        assert_eq!(
            value["payload"]["final_message"],
            "Agent stopped: maximum steps reached"
        );
    }

    #[test]
    fn tool_error_event_wraps_error_object() {
        let event = new_tool_error_event(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "call_9",
            crate::tools::ToolError {
                code: "UNKNOWN_TOOL".into(),
                message: "Unknown tool: frobnicate".into(),
                details: None,
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"]["error"]["code"], "UNKNOWN_TOOL");
        assert_eq!(value["id"], "call_9");
    }

    // Verifies inbound frames parse from their transport JSON shapes.
    #[test]
    fn client_frames_round_trip() {
        let send: ClientFrame = serde_json::from_str(
            r#"{"type":"send_message","payload":{"content":"list the repo"}}"#,
        )
        .unwrap();
        assert_eq!(
            send,
            ClientFrame::SendMessage {
                payload: SendMessagePayload {
                    content: "list the repo".into()
                }
            }
        );

        let approve: ClientFrame = serde_json::from_str(
            r#"{"type":"approve_tool","payload":{"tool_call_id":"c1","approved":false,"reason":"too risky"}}"#,
        )
        .unwrap();
        match &approve {
            ClientFrame::ApproveTool { payload } => {
                assert!(!payload.approved);
                assert_eq!(payload.reason.as_deref(), Some("too risky"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        let raw = serde_json::to_string(&approve).unwrap();
        let reparsed: ClientFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(reparsed, approve);

        let stop: ClientFrame = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(stop, ClientFrame::Stop);
    }

    #[test]
    fn chunk_frame_serializes_with_type_tag() {
        let frame = BookkeepingFrame::Chunk {
            payload: ChunkPayload {
                message_id: "m1".into(),
                content: "partial".into(),
                done: false,
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "chunk");
        assert_eq!(value["payload"]["message_id"], "m1");
    }
}
