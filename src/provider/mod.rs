//! Model-provider abstraction.
//!
//! One or more LLM endpoints sit behind the [`Provider`] trait as a uniform
//! stream of chunks. Tool-call arguments may arrive fragmented across delta
//! frames; the adapter reassembles them internally and only ever emits
//! finalized calls, so `StreamChunk::tool_calls` always carries complete
//! calls. A chunk with `done = true` precedes channel close; a channel that
//! closes without one signals a mid-flight stream failure.

mod openai;

pub use openai::OpenAiProvider;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::types::{ChatMessage, Role, ToolCall, ToolCallDelta, ToolDefinition, Usage};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// One unit of streamed model output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    /// Assistant text delta.
    pub content: Option<String>,
    /// Reasoning/thinking text delta.
    pub thinking: Option<String>,
    /// Finalized tool calls (never fragments).
    pub tool_calls: Vec<ToolCall>,
    /// True on the final chunk before channel close.
    pub done: bool,
}

impl StreamChunk {
    /// The terminal chunk.
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// Non-streaming completion result.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Full assistant text.
    pub content: String,
    /// Token usage when the backend reports it.
    pub usage: Option<Usage>,
    /// Backend stop reason (`stop`, `tool_calls`, ...).
    pub stop_reason: Option<String>,
}

/// A model endpoint the orchestrator can drive.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for diagnostics and the factory.
    fn name(&self) -> &'static str;

    /// One-shot completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &ProviderConfig,
    ) -> Result<Completion, ProviderError>;

    /// Plain text streaming.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &ProviderConfig,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError>;

    /// Tool-capable streaming.
    async fn stream_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &ProviderConfig,
        tools: Vec<ToolDefinition>,
        tool_choice: &str,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError>;
}

/// Build a provider by name. Unknown names fall back to the
/// OpenAI-compatible adapter, which covers every endpoint this service
/// currently talks to.
pub fn make_provider(name: &str, cfg: &ProviderConfig) -> Box<dyn Provider> {
    match name {
        "openai" | "" => Box::new(OpenAiProvider::new(cfg)),
        other => {
            tracing::warn!(provider = other, "unknown provider name, using openai-compatible");
            Box::new(OpenAiProvider::new(cfg))
        }
    }
}

// ---------------------------------------------------------------------------
// Tool-call reassembly
// ---------------------------------------------------------------------------

/// Accumulates fragmented tool-call deltas keyed by stream index.
///
/// The first fragment for an index carries the id and function name; later
/// fragments append argument text. `finish` yields complete calls in index
/// order.
#[derive(Debug, Default)]
pub(crate) struct ToolCallAssembler {
    partials: BTreeMap<usize, PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fold one delta fragment into the partial for its index.
    pub(crate) fn ingest(&mut self, delta: &ToolCallDelta) {
        let partial = self.partials.entry(delta.index).or_default();
        if let Some(id) = &delta.id {
            if !id.is_empty() {
                partial.id = id.clone();
            }
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                if !name.is_empty() {
                    partial.name = name.clone();
                }
            }
            if let Some(arguments) = &function.arguments {
                partial.arguments.push_str(arguments);
            }
        }
    }

    /// True when at least one fragment arrived.
    pub(crate) fn has_calls(&self) -> bool {
        !self.partials.is_empty()
    }

    /// Emit the finalized calls in index order, consuming the assembler.
    pub(crate) fn finish(self) -> Vec<ToolCall> {
        self.partials
            .into_values()
            .filter(|p| !p.name.is_empty())
            .map(|p| ToolCall {
                id: p.id,
                call_type: "function".to_string(),
                function: crate::types::FunctionCall {
                    name: p.name,
                    arguments: if p.arguments.is_empty() {
                        "{}".to_string()
                    } else {
                        p.arguments
                    },
                },
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Message translation
// ---------------------------------------------------------------------------

/// Coalesce runs of adjacent tool-role messages into a single user turn of
/// tool-result blocks, for backends that reject bare tool messages. Block
/// order matches the preceding assistant message's call order, and
/// `id_prefix` is stripped from correlation ids on the way through.
pub fn coalesce_tool_turns(messages: &[ChatMessage], id_prefix: Option<&str>) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    let mut run: Vec<&ChatMessage> = Vec::new();

    let flush = |run: &mut Vec<&ChatMessage>, out: &mut Vec<ChatMessage>| {
        if run.is_empty() {
            return;
        }
        let blocks: Vec<serde_json::Value> = run
            .iter()
            .map(|m| {
                let id = m.tool_call_id.as_deref().unwrap_or_default();
                let id = match id_prefix {
                    Some(prefix) => id.strip_prefix(prefix).unwrap_or(id),
                    None => id,
                };
                serde_json::json!({
                    "type": "tool_result",
                    "tool_call_id": id,
                    "name": m.name,
                    "content": m.content,
                })
            })
            .collect();
        out.push(ChatMessage {
            role: Role::User,
            content: Some(serde_json::to_string(&blocks).unwrap_or_default()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
        run.clear();
    };

    for message in messages {
        if message.role == Role::Tool {
            run.push(message);
            continue;
        }
        flush(&mut run, &mut out);
        out.push(message.clone());
    }
    flush(&mut run, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionCallDelta;

    fn fragment(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(String::from),
            function: Some(FunctionCallDelta {
                name: name.map(String::from),
                arguments: arguments.map(String::from),
            }),
        }
    }

    // Verifies argument fragments concatenate per index before emission.
    #[test]
    fn assembler_reassembles_fragmented_arguments() {
        let mut assembler = ToolCallAssembler::new();
        assembler.ingest(&fragment(0, Some("call_1"), Some("read_file"), Some("{\"pa")));
        assembler.ingest(&fragment(0, None, None, Some("th\":\".\"}")));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "read_file");
        assert_eq!(calls[0].function.arguments, "{\"path\":\".\"}");
    }

    #[test]
    fn assembler_keeps_index_order_across_interleaved_fragments() {
        let mut assembler = ToolCallAssembler::new();
        assembler.ingest(&fragment(1, Some("call_b"), Some("second"), Some("{}")));
        assembler.ingest(&fragment(0, Some("call_a"), Some("first"), Some("{}")));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "first");
        assert_eq!(calls[1].function.name, "second");
    }

    #[test]
    fn assembler_defaults_empty_arguments_to_empty_object() {
        let mut assembler = ToolCallAssembler::new();
        assembler.ingest(&fragment(0, Some("call_1"), Some("list_dir"), None));
        let calls = assembler.finish();
        assert_eq!(calls[0].function.arguments, "{}");
    }

    #[test]
    fn assembler_drops_nameless_partials() {
        let mut assembler = ToolCallAssembler::new();
        assembler.ingest(&fragment(0, Some("call_1"), None, Some("{}")));
        assert!(assembler.has_calls());
        assert!(assembler.finish().is_empty());
    }

    // Verifies adjacent tool messages merge into one user turn in order.
    #[test]
    fn coalesce_merges_adjacent_tool_messages() {
        let messages = vec![
            ChatMessage::user("go"),
            ChatMessage::assistant("", vec![]),
            ChatMessage::tool_result("call_1", "list_dir", "{\"ok\":true}"),
            ChatMessage::tool_result("call_2", "read_file", "{\"ok\":false}"),
            ChatMessage::assistant("done", vec![]),
        ];
        let out = coalesce_tool_turns(&messages, Some("call_"));
        assert_eq!(out.len(), 4);
        assert_eq!(out[2].role, Role::User);
        let blocks: serde_json::Value =
            serde_json::from_str(out[2].content.as_deref().unwrap()).unwrap();
        assert_eq!(blocks.as_array().unwrap().len(), 2);
        assert_eq!(blocks[0]["tool_call_id"], "1");
        assert_eq!(blocks[1]["tool_call_id"], "2");
        assert_eq!(blocks[0]["name"], "list_dir");
    }

    #[test]
    fn coalesce_leaves_histories_without_tool_messages_untouched() {
        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("yo", vec![])];
        let out = coalesce_tool_turns(&messages, None);
        assert_eq!(out, messages);
    }
}
