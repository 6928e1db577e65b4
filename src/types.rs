//! Data model for OpenAI-compatible chat endpoints.
//!
//! These types serialize/deserialize directly to/from the JSON payloads the
//! provider adapter exchanges with `/chat/completions`, including the
//! server-sent-event delta frames used while streaming.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message roles
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction message.
    System,
    /// End-user message.
    User,
    /// Assistant/model message.
    Assistant,
    /// Tool execution result message.
    Tool,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A single message in the wire-format conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Author role for this conversation turn.
    pub role: Role,

    /// Text content. Null when the assistant message is purely tool calls.
    pub content: Option<String>,

    /// Tool calls requested by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// When role == Tool, the id of the tool call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name on tool-result messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create an assistant message, optionally carrying tool calls.
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let content = content.into();
        Self {
            role: Role::Assistant,
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a tool result message, sent back after executing a tool call.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls (in assistant responses)
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned id correlating tool call and tool result.
    pub id: String,
    /// Tool call type; currently always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    /// Function metadata and arguments for this tool invocation.
    pub function: FunctionCall,
}

/// The function name and JSON-encoded arguments within a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    /// Function/tool name to execute.
    pub name: String,
    /// JSON-encoded string of the arguments object.
    pub arguments: String,
}

// ---------------------------------------------------------------------------
// Tool definitions (sent in requests)
// ---------------------------------------------------------------------------

/// Tool definition included in the request so the model knows what's callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Definition type; currently always `"function"`.
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function schema published to the model.
    pub function: FunctionDefinition,
}

/// The schema of a callable function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Exposed function/tool name.
    pub name: String,
    /// Natural-language description of tool behavior.
    pub description: String,
    /// JSON Schema object describing the parameters.
    pub parameters: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Chat completion request / response
// ---------------------------------------------------------------------------

/// Request body for POST /chat/completions.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier used for request routing.
    pub model: String,
    /// Conversation history sent to the model.
    pub messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Response body from a non-streaming POST /chat/completions.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Ranked response choices.
    pub choices: Vec<Choice>,
    /// Optional token usage metadata.
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// A single choice in the API response.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    /// Assistant message payload for this choice.
    pub message: ChatMessage,
    /// Provider stop reason (`stop`, `tool_calls`, etc.).
    pub finish_reason: Option<String>,
}

/// Token usage reported by the API.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Input tokens consumed by the request.
    pub prompt_tokens: u64,
    /// Output tokens generated by the model.
    pub completion_tokens: u64,
    /// Total tokens (`prompt + completion`).
    pub total_tokens: u64,
}

// ---------------------------------------------------------------------------
// Streaming delta frames
// ---------------------------------------------------------------------------

/// One parsed `data:` frame from the SSE stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamFrame {
    pub choices: Vec<DeltaChoice>,
}

/// A single choice within a streaming frame.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaChoice {
    pub delta: MessageDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental assistant-message fields within a streaming frame.
///
/// `tool_calls` entries may arrive fragmented: the first fragment for an
/// index carries the id/name, later fragments append argument text. Some
/// backends also emit `reasoning_content`/`thinking` deltas; both spellings
/// are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One fragment of a streamed tool call, keyed by `index`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionCallDelta>,
}

/// Function-fragment within a streamed tool call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // Verifies optional fields are omitted when absent during request serialization.
    #[test]
    fn serialize_chat_request() {
        let req = ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![ChatMessage::system("You are helpful."), ChatMessage::user("Hi")],
            max_tokens: Some(4096),
            temperature: Some(0.7),
            stream: None,
            tools: None,
            tool_choice: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
        assert_eq!(json["temperature"], 0.7);
        // stream / tools / tool_choice should be omitted
        assert!(json.get("stream").is_none());
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
    }

    // Verifies standard assistant text responses deserialize correctly.
    #[test]
    fn deserialize_chat_response() {
        let json = r#"{
            "id": "chatcmpl-123",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello!"
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 5,
                "total_tokens": 15
            }
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hello!"));
        assert_eq!(resp.usage.as_ref().unwrap().total_tokens, 15);
    }

    // Verifies assistant tool-call responses deserialize with null content.
    #[test]
    fn deserialize_tool_call_response() {
        let json = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "list_dir",
                            "arguments": "{\"path\":\".\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        let msg = &resp.choices[0].message;
        assert!(msg.content.is_none());
        let tc = msg.tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].function.name, "list_dir");
    }

    // Verifies fragmented tool-call deltas parse with index and partial fields.
    #[test]
    fn deserialize_stream_frame_with_tool_call_fragment() {
        let json = r#"{
            "choices": [{
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "function": { "name": "read_file", "arguments": "{\"pa" }
                    }]
                },
                "finish_reason": null
            }]
        }"#;
        let frame: StreamFrame = serde_json::from_str(json).unwrap();
        let delta = &frame.choices[0].delta;
        let fragment = &delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(fragment.index, 0);
        assert_eq!(fragment.id.as_deref(), Some("call_1"));
        assert_eq!(
            fragment.function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"pa")
        );
    }

    // Verifies thinking-style deltas are captured from either field spelling.
    #[test]
    fn deserialize_stream_frame_with_thinking_delta() {
        let frame: StreamFrame = serde_json::from_str(
            r#"{"choices":[{"delta":{"reasoning_content":"pondering"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(
            frame.choices[0].delta.reasoning_content.as_deref(),
            Some("pondering")
        );
    }

    #[test]
    fn message_constructors() {
        let sys = ChatMessage::system("hello");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let usr = ChatMessage::user("world");
        assert_eq!(usr.role, Role::User);

        let tool = ChatMessage::tool_result("call_1", "read_file", "result data");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool.name.as_deref(), Some("read_file"));

        let asst = ChatMessage::assistant("", vec![]);
        assert!(asst.content.is_none());
        assert!(asst.tool_calls.is_none());
    }
}
