//! Per-conversation agent session state.
//!
//! A session owns the ordered message history, parked tool calls awaiting
//! approval, and the command table for its running processes. It is pure
//! state behind a reader-writer lock: every public operation is individually
//! atomic, and the session never makes external calls itself.

use crate::config::{AgentConfig, AgentMode};
use crate::tools::{ArgMap, CommandTable};
use crate::types::{ChatMessage, Role, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// One message in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMessage {
    /// Message row id.
    pub id: String,
    /// Author role.
    pub role: Role,
    /// Text content; empty for pure tool-call messages.
    #[serde(default)]
    pub content: String,
    /// Tool calls on assistant messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Answered tool-call id on tool messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name on tool messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Append time, unix milliseconds.
    pub timestamp: u64,
}

impl ModelMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: now_millis(),
        }
    }

    /// Wire-format view of this message for the provider adapter.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: if self.content.is_empty() && !self.tool_calls.is_empty() {
                None
            } else {
                Some(self.content.clone())
            },
            tool_calls: if self.tool_calls.is_empty() {
                None
            } else {
                Some(self.tool_calls.clone())
            },
            tool_call_id: self.tool_call_id.clone(),
            name: self.name.clone(),
        }
    }
}

/// A tool call held back by a *confirm* policy decision.
#[derive(Debug, Clone)]
pub struct ParkedToolCall {
    /// The original provider-emitted call.
    pub call: ToolCall,
    /// Parsed arguments.
    pub args: ArgMap,
    /// Park time, unix milliseconds.
    pub created_at: u64,
}

/// Per-conversation state. All mutation goes through the interior lock.
pub struct AgentSession {
    /// Opaque session id.
    pub id: Uuid,
    /// Project this session operates on.
    pub project_id: Uuid,
    /// User driving the session.
    pub user_id: Uuid,
    state: RwLock<SessionState>,
    commands: Arc<CommandTable>,
}

struct SessionState {
    messages: Vec<ModelMessage>,
    pending: HashMap<String, ParkedToolCall>,
    config: AgentConfig,
    turn_active: bool,
    last_activity: u64,
}

impl AgentSession {
    /// Create a fresh session.
    pub fn new(project_id: Uuid, user_id: Uuid, _chat_id: Uuid, config: AgentConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            user_id,
            state: RwLock::new(SessionState {
                messages: Vec::new(),
                pending: HashMap::new(),
                config,
                turn_active: false,
                last_activity: now_millis(),
            }),
            commands: Arc::new(CommandTable::new()),
        }
    }

    // -- messages ----------------------------------------------------------

    /// Append a plain message.
    pub fn append_message(&self, role: Role, content: impl Into<String>) {
        let mut state = self.write();
        state.messages.push(ModelMessage::new(role, content));
        state.last_activity = now_millis();
    }

    /// Append an assistant message carrying tool calls.
    pub fn append_assistant(&self, content: impl Into<String>, tool_calls: Vec<ToolCall>) {
        let mut message = ModelMessage::new(Role::Assistant, content);
        message.tool_calls = tool_calls;
        let mut state = self.write();
        state.messages.push(message);
        state.last_activity = now_millis();
    }

    /// Append the tool-role answer to one tool call.
    pub fn append_tool_result(
        &self,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) {
        let mut message = ModelMessage::new(Role::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message.name = Some(name.into());
        let mut state = self.write();
        state.messages.push(message);
        state.last_activity = now_millis();
    }

    /// Insert the system prompt at index 0 unless one is already there.
    pub fn ensure_system_message(&self, default_prompt: &str) {
        let mut state = self.write();
        if state.messages.first().map(|m| m.role) == Some(Role::System) {
            return;
        }
        let prompt = if state.config.system_prompt.is_empty() {
            default_prompt.to_string()
        } else {
            state.config.system_prompt.clone()
        };
        let message = ModelMessage::new(Role::System, prompt);
        state.messages.insert(0, message);
    }

    /// Snapshot of the message history in insertion order.
    pub fn messages(&self) -> Vec<ModelMessage> {
        self.read().messages.clone()
    }

    /// Wire-format history for the provider adapter.
    pub fn provider_messages(&self) -> Vec<ChatMessage> {
        self.read()
            .messages
            .iter()
            .map(ModelMessage::to_chat_message)
            .collect()
    }

    // -- parked calls ------------------------------------------------------

    /// Park a tool call awaiting approval.
    pub fn park(&self, tool_call_id: impl Into<String>, parked: ParkedToolCall) {
        let mut state = self.write();
        state.pending.insert(tool_call_id.into(), parked);
        state.last_activity = now_millis();
    }

    /// Remove and return a parked call, if present.
    pub fn resolve_park(&self, tool_call_id: &str) -> Option<ParkedToolCall> {
        let mut state = self.write();
        state.last_activity = now_millis();
        state.pending.remove(tool_call_id)
    }

    /// True while any call awaits approval.
    pub fn has_parked_calls(&self) -> bool {
        !self.read().pending.is_empty()
    }

    // -- commands ----------------------------------------------------------

    /// The session's command table, shared with the tools.
    pub fn commands(&self) -> Arc<CommandTable> {
        Arc::clone(&self.commands)
    }

    /// Drop a command handle, releasing its buffered output.
    pub fn forget_command(&self, handle: &str) {
        self.commands.remove(handle);
    }

    // -- config / lifecycle ------------------------------------------------

    /// Session safety mode.
    pub fn mode(&self) -> AgentMode {
        self.read().config.mode
    }

    /// Clone of the session settings.
    pub fn config(&self) -> AgentConfig {
        self.read().config.clone()
    }

    /// Mark a turn as running; false when one already is.
    pub fn begin_turn(&self) -> bool {
        let mut state = self.write();
        if state.turn_active {
            return false;
        }
        state.turn_active = true;
        state.last_activity = now_millis();
        true
    }

    /// Mark the running turn as finished.
    pub fn end_turn(&self) {
        let mut state = self.write();
        state.turn_active = false;
        state.last_activity = now_millis();
    }

    /// Milliseconds since the last state change.
    pub fn idle_millis(&self) -> u64 {
        now_millis().saturating_sub(self.read().last_activity)
    }

    /// True when idle GC may collect this session: no active turn, nothing
    /// parked, no command still running. Finished handles do not pin the
    /// session; their buffered output dies with it.
    pub fn collectible(&self) -> bool {
        let state = self.read();
        !state.turn_active && state.pending.is_empty() && !self.commands.has_running()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().expect("session lock")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.state.write().expect("session lock")
    }
}

// ---------------------------------------------------------------------------
// Session table
// ---------------------------------------------------------------------------

/// Registry of live sessions with idle garbage collection.
pub struct SessionTable {
    inner: RwLock<HashMap<Uuid, Arc<AgentSession>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Create and register a fresh session.
    pub fn create(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        chat_id: Uuid,
        config: AgentConfig,
    ) -> Arc<AgentSession> {
        let session = Arc::new(AgentSession::new(project_id, user_id, chat_id, config));
        self.inner
            .write()
            .expect("table lock")
            .insert(session.id, Arc::clone(&session));
        session
    }

    /// Look up a session by id.
    pub fn get(&self, id: Uuid) -> Option<Arc<AgentSession>> {
        self.inner.read().expect("table lock").get(&id).cloned()
    }

    /// Remove a session outright.
    pub fn remove(&self, id: Uuid) -> Option<Arc<AgentSession>> {
        self.inner.write().expect("table lock").remove(&id)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.inner.read().expect("table lock").len()
    }

    /// True when no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions idle past `max_age` that hold no parked calls, no
    /// running commands, and no active turn. Returns the ids removed.
    pub fn cleanup_idle(&self, max_age: Duration) -> Vec<Uuid> {
        let mut table = self.inner.write().expect("table lock");
        let cutoff = max_age.as_millis() as u64;
        let doomed: Vec<Uuid> = table
            .values()
            .filter(|s| s.collectible() && s.idle_millis() > cutoff)
            .map(|s| s.id)
            .collect();
        for id in &doomed {
            table.remove(id);
        }
        doomed
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::types::FunctionCall;
    use serde_json::json;

    fn test_config() -> AgentConfig {
        AgentConfig {
            mode: AgentMode::Safe,
            limits: Limits::default(),
            system_prompt: String::new(),
            project_root: std::env::temp_dir(),
        }
    }

    fn test_session() -> AgentSession {
        AgentSession::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), test_config())
    }

    fn tool_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: "list_dir".to_string(),
                arguments: "{}".to_string(),
            },
        }
    }

    // Verifies append operations preserve insertion order.
    #[test]
    fn messages_preserve_insertion_order() {
        let session = test_session();
        session.append_message(Role::User, "first");
        session.append_assistant("second", vec![tool_call("c1")]);
        session.append_tool_result("c1", "list_dir", "{\"ok\":true}");
        session.append_message(Role::User, "third");

        let messages = session.messages();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "{\"ok\":true}", "third"]);
        assert_eq!(messages[1].tool_calls.len(), 1);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[2].name.as_deref(), Some("list_dir"));
    }

    #[test]
    fn ensure_system_message_inserts_once_at_index_zero() {
        let session = test_session();
        session.append_message(Role::User, "hello");
        session.ensure_system_message("default prompt");
        session.ensure_system_message("default prompt");

        let messages = session.messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "default prompt");
        assert_eq!(
            messages.iter().filter(|m| m.role == Role::System).count(),
            1
        );
    }

    #[test]
    fn configured_system_prompt_wins_over_default() {
        let mut config = test_config();
        config.system_prompt = "custom prompt".to_string();
        let session = AgentSession::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), config);
        session.ensure_system_message("default prompt");
        assert_eq!(session.messages()[0].content, "custom prompt");
    }

    #[test]
    fn park_and_resolve_round_trip() {
        let session = test_session();
        session.park(
            "c1",
            ParkedToolCall {
                call: tool_call("c1"),
                args: json!({"path": "."}).as_object().cloned().unwrap(),
                created_at: 1,
            },
        );
        assert!(session.has_parked_calls());

        let parked = session.resolve_park("c1").expect("parked call");
        assert_eq!(parked.call.id, "c1");
        assert!(!session.has_parked_calls());
        assert!(session.resolve_park("c1").is_none());
    }

    #[test]
    fn provider_messages_mirror_history() {
        let session = test_session();
        session.append_assistant("", vec![tool_call("c1")]);
        session.append_tool_result("c1", "list_dir", "result");

        let wire = session.provider_messages();
        assert_eq!(wire.len(), 2);
        assert!(wire[0].content.is_none());
        assert_eq!(wire[0].tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(wire[1].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn begin_turn_excludes_concurrent_turns() {
        let session = test_session();
        assert!(session.begin_turn());
        assert!(!session.begin_turn());
        session.end_turn();
        assert!(session.begin_turn());
    }

    #[test]
    fn collectible_only_when_fully_idle() {
        let session = test_session();
        assert!(session.collectible());

        session.begin_turn();
        assert!(!session.collectible());
        session.end_turn();

        session.park(
            "c1",
            ParkedToolCall {
                call: tool_call("c1"),
                args: ArgMap::new(),
                created_at: 1,
            },
        );
        assert!(!session.collectible());
        session.resolve_park("c1");
        assert!(session.collectible());
    }

    #[test]
    fn table_create_get_remove() {
        let table = SessionTable::new();
        let session = table.create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            test_config(),
        );
        assert_eq!(table.len(), 1);
        assert!(table.get(session.id).is_some());
        table.remove(session.id);
        assert!(table.get(session.id).is_none());
    }

    // Verifies idle GC spares sessions that hold parked approvals.
    #[test]
    fn cleanup_idle_spares_parked_sessions() {
        let table = SessionTable::new();
        let idle = table.create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            test_config(),
        );
        let parked = table.create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            test_config(),
        );
        parked.park(
            "c1",
            ParkedToolCall {
                call: tool_call("c1"),
                args: ArgMap::new(),
                created_at: 1,
            },
        );

        std::thread::sleep(Duration::from_millis(5));
        let removed = table.cleanup_idle(Duration::from_millis(1));
        assert_eq!(removed, vec![idle.id]);
        assert!(table.get(parked.id).is_some());
    }
}
