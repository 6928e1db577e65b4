//! Sandboxed tool system.
//!
//! Tools are async trait objects the model can invoke during the agent loop.
//! The registry owns their descriptors, validates call arguments against the
//! declared JSON schemas, and dispatches execution with a uniform result
//! envelope, duration stamping, and panic containment.

pub mod command;
pub mod envelope;
pub mod list_dir;
pub mod patch;
pub mod read_file;
pub mod search;

use crate::agent::events::AgentEvent;
use crate::config::{AgentMode, Limits};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub use command::CommandTable;
pub use envelope::{codes, ResultMeta, ToolError, ToolResult};

/// Parsed JSON argument object handed to tool executors.
pub type ArgMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Policy hint
// ---------------------------------------------------------------------------

/// Default gating a tool declares for itself. The policy engine may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPolicy {
    /// Execute immediately.
    Allow,
    /// Pause for user confirmation.
    Confirm,
    /// Refuse.
    Deny,
}

// ---------------------------------------------------------------------------
// Tool context
// ---------------------------------------------------------------------------

/// Runtime context passed to tools.
#[derive(Clone)]
pub struct ToolContext {
    /// Owning agent session.
    pub session_id: Uuid,
    /// Project the session operates on.
    pub project_id: Uuid,
    /// User driving the session.
    pub user_id: Uuid,
    /// Absolute root all filesystem access is confined to.
    pub project_root: PathBuf,
    /// Session safety mode.
    pub mode: AgentMode,
    /// Resource limits for this session.
    pub limits: Limits,
    /// Shared table of running/completed commands for this session.
    pub commands: Arc<CommandTable>,
    /// Optional sink for command.output / command.done events.
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    /// Optional turn cancellation token; long-running tools race against it.
    cancel: Option<watch::Receiver<bool>>,
}

impl ToolContext {
    /// Build a context for one session.
    pub fn new(
        session_id: Uuid,
        project_id: Uuid,
        user_id: Uuid,
        project_root: PathBuf,
        mode: AgentMode,
        limits: Limits,
        commands: Arc<CommandTable>,
    ) -> Self {
        Self {
            session_id,
            project_id,
            user_id,
            project_root,
            mode,
            limits,
            commands,
            events: None,
            cancel: None,
        }
    }

    /// Attach an event sink for streaming command output.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Attach the turn's cancellation token.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Emit one event if a sink is attached.
    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// True when the turn has been cancelled.
    pub fn cancellation_requested(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve when the turn's cancellation token fires; pend forever when
    /// no token is attached.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.cancel else {
            return std::future::pending::<()>().await;
        };
        let mut rx = rx.clone();
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
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// A tool that can be invoked by the model.
///
/// Implement this trait to add custom tools. Register instances with
/// [`ToolRegistry`] before starting the orchestrator.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name matching what the model will call.
    fn name(&self) -> &'static str;

    /// Natural-language description published to the model.
    fn description(&self) -> &'static str;

    /// JSON Schema for the argument object.
    fn parameters(&self) -> Value;

    /// Default gating for this tool.
    fn policy_hint(&self) -> ToolPolicy;

    /// Execute with validated arguments. Failures are data, not panics: a
    /// failed run returns `ToolResult { ok: false, .. }`.
    async fn execute(&self, args: &ArgMap, ctx: &ToolContext) -> ToolResult;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Rejection reasons from [`ToolRegistry::register`].
#[derive(Debug)]
pub enum RegistryError {
    /// A tool with this name is already registered.
    Duplicate(String),
    /// The declared parameter schema is unusable.
    InvalidSchema { tool: String, reason: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(name) => write!(f, "tool already registered: {name}"),
            Self::InvalidSchema { tool, reason } => {
                write!(f, "invalid JSON schema for tool {tool}: {reason}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registry of available tools.
///
/// The orchestrator sends all registered tool definitions to the provider and
/// dispatches tool calls through this registry.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the built-in tool set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in builtin_tools() {
            registry
                .register_boxed(tool)
                .expect("builtin tool set is internally consistent");
        }
        registry
    }

    /// Register a tool, rejecting duplicates and malformed schemas.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_boxed(Box::new(tool))
    }

    fn register_boxed(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        if self.has_tool(tool.name()) {
            return Err(RegistryError::Duplicate(tool.name().to_string()));
        }
        check_schema(tool.name(), &tool.parameters())?;
        self.tools.push(tool);
        Ok(())
    }

    /// True when a tool with the given name is registered.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name() == name)
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|tool| tool.name() == name)
            .map(AsRef::as_ref)
    }

    /// Tool definitions in the shape the provider adapter expects.
    pub fn list_for_model(&self) -> Vec<crate::types::ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| crate::types::ToolDefinition {
                tool_type: "function".to_string(),
                function: crate::types::FunctionDefinition {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters(),
                },
            })
            .collect()
    }

    /// Validate an argument object against a tool's declared schema.
    pub fn validate_args(&self, name: &str, args: &ArgMap) -> Result<(), String> {
        let Some(tool) = self.get(name) else {
            return Err(format!("unknown tool: {name}"));
        };
        validate_against_schema(&tool.parameters(), args)
    }

    /// Validate, dispatch, and stamp one tool execution.
    ///
    /// Executor panics become `EXECUTION_ERROR` results; `meta.duration_ms`
    /// is set from wall clock on every outcome, and the session-wide
    /// `max_tool_time` cap yields `TOOL_TIMEOUT`.
    pub async fn execute(&self, name: &str, args: &ArgMap, ctx: &ToolContext) -> ToolResult {
        let started = Instant::now();
        let Some(tool) = self.get(name) else {
            return stamp(
                ToolResult::error(codes::UNKNOWN_TOOL, format!("Tool not found: {name}")),
                started,
            );
        };

        if let Err(reason) = validate_against_schema(&tool.parameters(), args) {
            return stamp(ToolResult::error(codes::VALIDATION_ERROR, reason), started);
        }

        let budget = Duration::from_millis(ctx.limits.max_tool_time_ms);
        let run = AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind();
        let result = match tokio::time::timeout(budget, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => ToolResult::error(
                codes::EXECUTION_ERROR,
                format!("tool {name} panicked during execution"),
            ),
            Err(_elapsed) => ToolResult::error(
                codes::TOOL_TIMEOUT,
                format!("tool {name} exceeded the {}ms execution budget", budget.as_millis()),
            ),
        };
        stamp(result, started)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The seven built-in tools, in registration order.
fn builtin_tools() -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(list_dir::ListDirTool),
        Box::new(read_file::ReadFileTool),
        Box::new(search::SearchInFilesTool),
        Box::new(patch::ApplyPatchTool),
        Box::new(command::RunCommandTool),
        Box::new(command::GetCommandOutputTool),
        Box::new(command::CancelCommandTool),
    ]
}

/// Ensure `meta.duration_ms` reflects wall-clock elapsed time.
fn stamp(mut result: ToolResult, started: Instant) -> ToolResult {
    let meta = result.meta.get_or_insert_with(ResultMeta::default);
    meta.duration_ms = started.elapsed().as_millis() as i64;
    result
}

/// Structural schema check at registration time.
fn check_schema(tool: &str, schema: &Value) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSchema {
        tool: tool.to_string(),
        reason: reason.to_string(),
    };
    let object = schema.as_object().ok_or_else(|| invalid("schema is not an object"))?;
    if object.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("schema type must be \"object\""));
    }
    let properties = object
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("schema has no properties object"))?;
    if let Some(required) = object.get("required") {
        let names = required
            .as_array()
            .ok_or_else(|| invalid("required must be an array"))?;
        for name in names {
            let name = name.as_str().ok_or_else(|| invalid("required entries must be strings"))?;
            if !properties.contains_key(name) {
                return Err(invalid(&format!("required property {name} is not declared")));
            }
        }
    }
    Ok(())
}

/// Check required presence and primitive type conformance of arguments.
fn validate_against_schema(schema: &Value, args: &ArgMap) -> Result<(), String> {
    let Some(object) = schema.as_object() else {
        return Ok(());
    };
    if let Some(required) = object.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                return Err(format!("missing required argument: {name}"));
            }
        }
    }
    let Some(properties) = object.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, value) in args {
        let Some(declared) = properties.get(name) else {
            // Unknown arguments are tolerated; models add them freely.
            continue;
        };
        let Some(expected) = declared.get("type").and_then(Value::as_str) else {
            continue;
        };
        if !value_matches_type(value, expected) {
            return Err(format!("argument {name} must be of type {expected}"));
        }
    }
    Ok(())
}

/// Map a path-guard rejection onto the wire error taxonomy.
pub(crate) fn guard_error_result(err: crate::pathguard::GuardError) -> ToolResult {
    use crate::pathguard::GuardError;
    match &err {
        GuardError::Invalid | GuardError::Traversal => {
            ToolResult::error(codes::INVALID_PATH, err.to_string())
        }
        GuardError::Forbidden | GuardError::Escape => {
            ToolResult::error(codes::PERMISSION_DENIED, err.to_string())
        }
        GuardError::TooLarge { size, max } => ToolResult::error_with_details(
            codes::SIZE_LIMIT_EXCEEDED,
            err.to_string(),
            Some(serde_json::json!({ "size": size, "max_size": max })),
        ),
        GuardError::NotFound => ToolResult::error(codes::FILE_NOT_FOUND, err.to_string()),
        GuardError::WrongKind => ToolResult::error(codes::INVALID_PATH, err.to_string()),
        GuardError::Io(_) => ToolResult::error(codes::EXECUTION_ERROR, err.to_string()),
    }
}

/// Primitive JSON-schema type check.
fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}
