//! Agent orchestrator.
//!
//! Turns a user prompt into a sequence of model steps and tool invocations:
//! stream the model, dispatch its tool calls under policy, feed results
//! back, repeat until the model answers in plain text, a confirmation parks
//! the turn, the step budget runs out, or the caller cancels.

pub mod events;

use crate::config::ProviderConfig;
use crate::error::{AgentError, ProviderError};
use crate::policy::{summarize_call, PolicyDecision, PolicyEngine};
use crate::provider::Provider;
use crate::session::{AgentSession, ParkedToolCall, SessionTable};
use crate::tools::{codes, ArgMap, ToolContext, ToolRegistry, ToolResult};
use crate::types::{Role, ToolCall};
use events::{
    new_agent_done_event, new_agent_error_event, new_assistant_delta_event,
    new_assistant_final_event, new_assistant_thinking_event, new_tool_approval_event,
    new_tool_call_event, new_tool_error_event, new_tool_result_event, now_unix_millis,
    AgentDonePayload, AgentErrorPayload, AgentEvent, ToolApprovalPayload, ToolCallPayload,
    ToolResultPayload,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// System prompt used when the session config does not provide one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a coding assistant working inside a web IDE. You can inspect and \
modify the open project through tools.

Rules:
1. Use tools to interact with files and run commands; always pass every \
required argument.
2. Create or modify files with apply_patch and a unified diff. New files use \
a `--- /dev/null` header.
3. Check each tool result before deciding the next step. `\"ok\": true` \
means the operation succeeded; do not repeat it to verify.
4. Long commands keep running under their handle; page through output with \
get_command_output and stop them with cancel_command.
5. When the task is done, reply to the user in plain text without calling \
more tools.";

/// How one agent turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final answer (or the step budget ran out).
    Completed { steps: u32 },
    /// A tool call is parked awaiting approval.
    Paused { tool_call_id: String },
    /// A transport-level failure aborted the turn; parked state survives.
    Errored { message: String },
    /// The caller's cancellation token fired.
    Cancelled,
}

/// Event sink handed to [`Orchestrator::run`].
pub type EventSender = mpsc::UnboundedSender<AgentEvent>;

/// Drives sessions through model steps and tool execution.
pub struct Orchestrator {
    registry: ToolRegistry,
    provider: Box<dyn Provider>,
    provider_cfg: ProviderConfig,
    policy: PolicyEngine,
    sessions: SessionTable,
}

impl Orchestrator {
    /// Build an orchestrator owning its registries.
    pub fn new(
        registry: ToolRegistry,
        provider: Box<dyn Provider>,
        provider_cfg: ProviderConfig,
    ) -> Self {
        Self {
            registry,
            provider,
            provider_cfg,
            policy: PolicyEngine::new(),
            sessions: SessionTable::new(),
        }
    }

    /// Replace the default policy engine.
    pub fn with_policy(mut self, policy: PolicyEngine) -> Self {
        self.policy = policy;
        self
    }

    /// The session registry this orchestrator owns.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Execute one agent turn until completion, parking, cancellation, or
    /// step exhaustion. `user_text` may be empty on approval re-entry.
    pub async fn run(
        &self,
        session: &Arc<AgentSession>,
        user_text: &str,
        send: &EventSender,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> TurnOutcome {
        if !user_text.is_empty() {
            session.append_message(Role::User, user_text);
        }
        session.ensure_system_message(DEFAULT_SYSTEM_PROMPT);

        if !session.begin_turn() {
            return TurnOutcome::Errored {
                message: "a turn is already running for this session".to_string(),
            };
        }
        let outcome = self.step_loop(session, send, &mut cancel).await;
        session.end_turn();
        outcome
    }

    /// Resolve a parked tool call: execute it (or synthesize a rejection)
    /// and re-enter the step loop so the model can continue.
    pub async fn handle_approval(
        &self,
        session_id: uuid::Uuid,
        tool_call_id: &str,
        approved: bool,
        reason: &str,
        send: &EventSender,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<TurnOutcome, AgentError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        let parked = session
            .resolve_park(tool_call_id)
            .ok_or_else(|| AgentError::UnknownToolCall(tool_call_id.to_string()))?;

        let name = parked.call.function.name.clone();
        let result = if approved {
            self.execute_tool(&session, &name, &parked.args, send, cancel.clone())
                .await
        } else {
            ToolResult::error(codes::USER_REJECTED, format!("User rejected: {reason}"))
        };

        self.emit_tool_result(&session, tool_call_id, &name, &result, send);
        session.append_tool_result(tool_call_id, &name, result.to_wire());

        Ok(self.run(&session, "", send, cancel).await)
    }

    // -- step loop ---------------------------------------------------------

    async fn step_loop(
        &self,
        session: &Arc<AgentSession>,
        send: &EventSender,
        cancel: &mut Option<watch::Receiver<bool>>,
    ) -> TurnOutcome {
        let max_steps = session.config().limits.max_steps;

        for step in 0..max_steps {
            if cancellation_requested(cancel) {
                return TurnOutcome::Cancelled;
            }

            let tool_defs = self.registry.list_for_model();
            debug!(session = %session.id, step, tools = tool_defs.len(), "agent step");

            let stream = self
                .provider
                .stream_with_tools(
                    session.provider_messages(),
                    &self.provider_cfg,
                    tool_defs,
                    "auto",
                )
                .await;
            let mut chunks = match stream {
                Ok(chunks) => chunks,
                Err(e) => return self.stream_error(session, e, send),
            };

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut saw_done = false;
            loop {
                let chunk = tokio::select! {
                    _ = wait_for_cancellation(cancel) => return TurnOutcome::Cancelled,
                    chunk = chunks.recv() => chunk,
                };
                let Some(chunk) = chunk else { break };
                if let Some(content) = &chunk.content {
                    text.push_str(content);
                    let _ = send.send(new_assistant_delta_event(
                        session.id,
                        session.project_id,
                        content,
                    ));
                }
                if let Some(thinking) = &chunk.thinking {
                    let _ = send.send(new_assistant_thinking_event(
                        session.id,
                        session.project_id,
                        thinking,
                    ));
                }
                calls.extend(chunk.tool_calls.clone());
                if chunk.done {
                    saw_done = true;
                    break;
                }
            }
            if !saw_done {
                return self.stream_error(
                    session,
                    ProviderError::Stream("stream closed before completion".to_string()),
                    send,
                );
            }

            if calls.is_empty() {
                if text.is_empty() {
                    // Nothing usable this step; let the model try again.
                    continue;
                }
                session.append_assistant(text.clone(), Vec::new());
                let _ = send.send(new_assistant_final_event(
                    session.id,
                    session.project_id,
                    &text,
                ));
                return TurnOutcome::Completed { steps: step + 1 };
            }

            session.append_assistant(text, calls.clone());

            for (idx, tc) in calls.iter().enumerate() {
                if cancellation_requested(cancel) {
                    self.append_cancelled_results(session, &calls[idx..]);
                    return TurnOutcome::Cancelled;
                }
                // Race the dispatch against the cancellation token so a
                // long-running tool is torn down, not merely outlived. The
                // tool context carries the same token, so an in-flight
                // run_command kills its process group on the way out.
                let tool_cancel = cancel.clone();
                let dispatched = tokio::select! {
                    _ = wait_for_cancellation(cancel) => {
                        self.append_cancelled_results(session, &calls[idx..]);
                        return TurnOutcome::Cancelled;
                    }
                    dispatched = self.dispatch_tool_call(session, tc, send, tool_cancel) => dispatched,
                };
                if let Some(outcome) = dispatched {
                    return outcome;
                }
            }
        }

        let _ = send.send(new_agent_done_event(
            session.id,
            session.project_id,
            AgentDonePayload {
                steps: max_steps,
                final_message: "Agent stopped: maximum steps reached".to_string(),
            },
        ));
        TurnOutcome::Completed { steps: max_steps }
    }

    /// Handle one emitted tool call. Returns `Some(outcome)` when the turn
    /// must stop here (parking), `None` to continue with the next call.
    async fn dispatch_tool_call(
        &self,
        session: &Arc<AgentSession>,
        tc: &ToolCall,
        send: &EventSender,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Option<TurnOutcome> {
        let name = tc.function.name.as_str();

        if !self.registry.has_tool(name) {
            let error = crate::tools::ToolError {
                code: codes::UNKNOWN_TOOL.to_string(),
                message: format!("Unknown tool: {name}"),
                details: None,
            };
            let _ = send.send(new_tool_error_event(
                session.id,
                session.project_id,
                &tc.id,
                error.clone(),
            ));
            let result = ToolResult {
                ok: false,
                data: None,
                meta: None,
                error: Some(error),
            };
            session.append_tool_result(&tc.id, name, result.to_wire());
            return None;
        }

        // Tolerant argument parse: malformed JSON degrades to {} so the
        // tool's own validation can answer the model.
        let args: ArgMap = serde_json::from_str::<Value>(&tc.function.arguments)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();

        let decision = self.policy.decide(name, session, &args);
        let _ = send.send(new_tool_call_event(
            session.id,
            session.project_id,
            ToolCallPayload {
                id: tc.id.clone(),
                name: name.to_string(),
                arguments: Value::Object(args.clone()),
            },
        ));

        match decision {
            PolicyDecision::Allow => {
                let result = self.execute_tool(session, name, &args, send, cancel).await;
                self.emit_tool_result(session, &tc.id, name, &result, send);
                session.append_tool_result(&tc.id, name, result.to_wire());
                None
            }
            PolicyDecision::Confirm => {
                let summary = summarize_call(name, &args);
                let _ = send.send(new_tool_approval_event(
                    session.id,
                    session.project_id,
                    ToolApprovalPayload {
                        id: tc.id.clone(),
                        name: name.to_string(),
                        arguments: Value::Object(args.clone()),
                        summary,
                        policy: "confirm".to_string(),
                    },
                ));
                session.park(
                    &tc.id,
                    ParkedToolCall {
                        call: tc.clone(),
                        args,
                        created_at: now_unix_millis(),
                    },
                );
                // At most one parked call per session: later calls from this
                // step are dropped and re-emitted by the model after the
                // result arrives.
                Some(TurnOutcome::Paused {
                    tool_call_id: tc.id.clone(),
                })
            }
            PolicyDecision::Deny => {
                let result =
                    ToolResult::error(codes::PERMISSION_DENIED, "Tool blocked by policy");
                self.emit_tool_result(session, &tc.id, name, &result, send);
                session.append_tool_result(&tc.id, name, result.to_wire());
                None
            }
        }
    }

    async fn execute_tool(
        &self,
        session: &Arc<AgentSession>,
        name: &str,
        args: &ArgMap,
        send: &EventSender,
        cancel: Option<watch::Receiver<bool>>,
    ) -> ToolResult {
        let config = session.config();
        let mut ctx = ToolContext::new(
            session.id,
            session.project_id,
            session.user_id,
            config.project_root,
            config.mode,
            config.limits,
            session.commands(),
        )
        .with_events(send.clone());
        if let Some(cancel) = cancel {
            ctx = ctx.with_cancellation(cancel);
        }
        self.registry.execute(name, args, &ctx).await
    }

    /// Answer `calls` with synthetic cancelled results so every emitted tool
    /// call still has a tool-role message when the turn aborts.
    fn append_cancelled_results(&self, session: &Arc<AgentSession>, calls: &[ToolCall]) {
        for tc in calls {
            let result =
                ToolResult::error(codes::EXECUTION_ERROR, "operation cancelled by user");
            session.append_tool_result(&tc.id, &tc.function.name, result.to_wire());
        }
    }

    fn emit_tool_result(
        &self,
        session: &Arc<AgentSession>,
        tool_call_id: &str,
        name: &str,
        result: &ToolResult,
        send: &EventSender,
    ) {
        let _ = send.send(new_tool_result_event(
            session.id,
            session.project_id,
            ToolResultPayload {
                id: tool_call_id.to_string(),
                name: name.to_string(),
                ok: result.ok,
                result: result.data.clone(),
                error: result.error.clone(),
                duration_ms: result.meta.as_ref().map(|m| m.duration_ms),
            },
        ));
    }

    fn stream_error(
        &self,
        session: &Arc<AgentSession>,
        err: ProviderError,
        send: &EventSender,
    ) -> TurnOutcome {
        warn!(session = %session.id, error = %err, "provider stream error");
        let message = err.to_string();
        let _ = send.send(new_agent_error_event(
            session.id,
            session.project_id,
            AgentErrorPayload {
                code: "STREAM_ERROR".to_string(),
                message: message.clone(),
            },
        ));
        TurnOutcome::Errored { message }
    }
}

/// True when the caller's token has fired.
fn cancellation_requested(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Resolve when the cancellation token fires; pend forever without one.
async fn wait_for_cancellation(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => {
            if *rx.borrow() {
                return;
            }
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return;
                }
            }
            // Sender dropped without firing; never resolve.
            std::future::pending::<()>().await;
        }
        None => std::future::pending::<()>().await,
    }
}
