//! Shell command execution with buffered, queryable output.
//!
//! `run_command` starts a child via `sh -c`, registers it under an opaque
//! handle, scans stdout/stderr into a byte-capped output buffer, and waits
//! for exit or timeout. `get_command_output` pages through the buffer (also
//! after exit), and `cancel_command` kills the child. Completed commands stay
//! in the table until their handle is reclaimed.

use super::{codes, guard_error_result, ArgMap, Tool, ToolContext, ToolPolicy, ToolResult};
use crate::agent::events::{
    new_command_done_event, new_command_output_event, now_unix_millis, CommandDonePayload,
    CommandOutputPayload,
};
use crate::pathguard::PathGuard;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// Default child timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 600_000;
/// Child timeout clamp bounds in milliseconds.
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 1_800_000;
/// Default page size for output queries.
const DEFAULT_OUTPUT_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Output buffer
// ---------------------------------------------------------------------------

/// One scanned output line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputEntry {
    /// Source stream: `stdout` or `stderr`.
    pub stream: String,
    /// Line text without the trailing newline.
    pub text: String,
    /// Capture time, unix milliseconds.
    pub ts: u64,
}

/// Byte-capped FIFO of output entries. Overflow evicts whole oldest entries;
/// the newest entry is always retained.
struct OutputBuffer {
    entries: VecDeque<OutputEntry>,
    total_bytes: usize,
    max_bytes: usize,
}

impl OutputBuffer {
    fn new(max_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            total_bytes: 0,
            max_bytes,
        }
    }

    fn push(&mut self, entry: OutputEntry) {
        while !self.entries.is_empty() && self.total_bytes + entry.text.len() > self.max_bytes {
            if let Some(evicted) = self.entries.pop_front() {
                self.total_bytes -= evicted.text.len();
            }
        }
        self.total_bytes += entry.text.len();
        self.entries.push_back(entry);
    }

    fn snapshot(&self) -> Vec<OutputEntry> {
        self.entries.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tracked commands
// ---------------------------------------------------------------------------

/// A running or completed command registered under a handle.
pub struct TrackedCommand {
    /// Opaque handle naming this command.
    pub handle: String,
    /// Spawn time, unix seconds.
    pub started_at: u64,
    state: Mutex<CommandState>,
    output: Mutex<OutputBuffer>,
    cancel: watch::Sender<bool>,
}

#[derive(Clone, Copy)]
struct CommandState {
    done: bool,
    exit_code: i32,
}

impl TrackedCommand {
    fn new(handle: String, max_output_bytes: usize) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            handle,
            started_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            state: Mutex::new(CommandState {
                done: false,
                exit_code: 0,
            }),
            output: Mutex::new(OutputBuffer::new(max_output_bytes)),
            cancel,
        }
    }

    fn push_output(&self, entry: OutputEntry) {
        self.output.lock().expect("output lock").push(entry);
    }

    /// Snapshot of all buffered entries in append order.
    pub fn output_snapshot(&self) -> Vec<OutputEntry> {
        self.output.lock().expect("output lock").snapshot()
    }

    fn mark_done(&self, exit_code: i32) {
        let mut state = self.state.lock().expect("state lock");
        if !state.done {
            state.done = true;
            state.exit_code = exit_code;
        }
    }

    /// `(done, exit_code)` snapshot.
    pub fn status(&self) -> (bool, i32) {
        let state = self.state.lock().expect("state lock");
        (state.done, state.exit_code)
    }

    /// Signal cancellation to the waiter that owns the child.
    fn request_cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Per-session registry of command handles.
pub struct CommandTable {
    inner: Mutex<HashMap<String, Arc<TrackedCommand>>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, tracked: Arc<TrackedCommand>) {
        self.inner
            .lock()
            .expect("table lock")
            .insert(tracked.handle.clone(), tracked);
    }

    /// Look up a command by handle.
    pub fn get(&self, handle: &str) -> Option<Arc<TrackedCommand>> {
        self.inner.lock().expect("table lock").get(handle).cloned()
    }

    /// Drop a handle, releasing its buffered output.
    pub fn remove(&self, handle: &str) -> Option<Arc<TrackedCommand>> {
        self.inner.lock().expect("table lock").remove(handle)
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("table lock").len()
    }

    /// True while any registered command is still running.
    pub fn has_running(&self) -> bool {
        self.inner
            .lock()
            .expect("table lock")
            .values()
            .any(|tracked| !tracked.status().0)
    }

    /// True when no commands are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// run_command
// ---------------------------------------------------------------------------

/// Tool that executes a shell command with buffered streaming output.
pub struct RunCommandTool;

#[derive(Deserialize)]
#[serde(default)]
struct RunArgs {
    cmd: String,
    cwd: String,
    timeout_ms: u64,
    env: HashMap<String, String>,
    stream: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            cmd: String::new(),
            cwd: ".".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            env: HashMap::new(),
            stream: true,
        }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command with optional streaming output"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cmd": { "type": "string" },
                "cwd": { "type": "string", "default": "." },
                "timeout_ms": { "type": "integer", "default": 600000, "minimum": 1000, "maximum": 1800000 },
                "env": { "type": "object" },
                "stream": { "type": "boolean", "default": true }
            },
            "required": ["cmd"]
        })
    }

    fn policy_hint(&self) -> ToolPolicy {
        ToolPolicy::Confirm
    }

    async fn execute(&self, args: &ArgMap, ctx: &ToolContext) -> ToolResult {
        let args: RunArgs = match serde_json::from_value(Value::Object(args.clone())) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(codes::VALIDATION_ERROR, e.to_string()),
        };
        if args.cmd.is_empty() {
            return ToolResult::error(codes::VALIDATION_ERROR, "cmd is required");
        }
        let timeout = Duration::from_millis(args.timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS));

        let guard = PathGuard::new(&ctx.project_root, ctx.limits.clone());
        let abs_cwd = match guard.resolve(&args.cwd) {
            Ok(abs) => abs,
            Err(err) => return guard_error_result(err),
        };
        if let Err(err) = guard.validate_dir_access(&abs_cwd) {
            return guard_error_result(err);
        }

        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(&args.cmd)
            .current_dir(&abs_cwd)
            .envs(&args.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The registry's tool-time budget can drop this future mid-run;
            // take the shell down with it instead of leaking it.
            .kill_on_drop(true);
        // The shell leads its own process group so cancellation can kill the
        // whole command tree, not just `sh` itself.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ToolResult::error_with_details(
                    codes::EXECUTION_ERROR,
                    "command start error",
                    Some(json!(e.to_string())),
                )
            }
        };

        let handle = Uuid::new_v4().to_string();
        let tracked = Arc::new(TrackedCommand::new(
            handle.clone(),
            ctx.limits.max_output_bytes,
        ));
        ctx.commands.insert(Arc::clone(&tracked));
        debug!(handle = %handle, cmd = %args.cmd, "command started");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut scanners = Vec::new();
        if let Some(stdout) = stdout {
            scanners.push(spawn_scanner(
                stdout,
                "stdout",
                Arc::clone(&tracked),
                ctx.clone(),
                args.stream,
            ));
        }
        if let Some(stderr) = stderr {
            scanners.push(spawn_scanner(
                stderr,
                "stderr",
                Arc::clone(&tracked),
                ctx.clone(),
                args.stream,
            ));
        }

        let mut cancel_rx = tracked.cancel.subscribe();
        let outcome = if *cancel_rx.borrow_and_update() || ctx.cancellation_requested() {
            // Cancelled between registration and subscription.
            WaitOutcome::Cancelled
        } else {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => WaitOutcome::Exited(status.code().unwrap_or(-1)),
                    Err(e) => WaitOutcome::Failed(e.to_string()),
                },
                _ = cancel_rx.changed() => WaitOutcome::Cancelled,
                _ = ctx.cancelled() => WaitOutcome::Cancelled,
                _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            }
        };
        if matches!(outcome, WaitOutcome::Cancelled | WaitOutcome::TimedOut) {
            kill_command_tree(&mut child).await;
        }

        // Pipes reach EOF once the child is gone; give the scanners a moment
        // to drain the tail before command.done goes out.
        for scanner in scanners {
            let _ = tokio::time::timeout(Duration::from_secs(1), scanner).await;
        }

        let exit_code = match &outcome {
            WaitOutcome::Exited(code) => *code,
            _ => -1,
        };
        tracked.mark_done(exit_code);
        ctx.emit(new_command_done_event(
            ctx.session_id,
            ctx.project_id,
            CommandDonePayload {
                handle: handle.clone(),
                exit_code,
            },
        ));
        debug!(handle = %handle, exit_code, "command finished");

        match outcome {
            WaitOutcome::TimedOut => ToolResult::error_with_details(
                codes::TOOL_TIMEOUT,
                format!("command timed out after {}ms", timeout.as_millis()),
                Some(json!({ "handle": handle })),
            ),
            WaitOutcome::Failed(reason) => ToolResult::error(codes::EXECUTION_ERROR, reason),
            WaitOutcome::Exited(_) | WaitOutcome::Cancelled => ToolResult::success(json!({
                "handle": handle,
                "started": tracked.started_at,
                "cwd": abs_cwd.to_string_lossy(),
                "exit_code": exit_code,
            })),
        }
    }
}

enum WaitOutcome {
    Exited(i32),
    Cancelled,
    TimedOut,
    Failed(String),
}

/// Kill the child's whole process group, then reap the direct child. The
/// shell was spawned as a group leader, so the negative-pid signal reaches
/// every process the command forked.
async fn kill_command_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
}

/// Scan one pipe line-by-line into the output buffer, optionally emitting
/// command.output events in append order.
fn spawn_scanner(
    pipe: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    stream: &'static str,
    tracked: Arc<TrackedCommand>,
    ctx: ToolContext,
    emit_events: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(text)) = lines.next_line().await {
            let entry = OutputEntry {
                stream: stream.to_string(),
                text,
                ts: now_unix_millis(),
            };
            tracked.push_output(entry.clone());
            if emit_events {
                ctx.emit(new_command_output_event(
                    ctx.session_id,
                    ctx.project_id,
                    CommandOutputPayload {
                        handle: tracked.handle.clone(),
                        stream: entry.stream,
                        text: entry.text,
                        ts: entry.ts,
                    },
                ));
            }
        }
    })
}

// ---------------------------------------------------------------------------
// get_command_output
// ---------------------------------------------------------------------------

/// Tool that pages through a command's buffered output.
pub struct GetCommandOutputTool;

#[derive(Deserialize)]
#[serde(default)]
struct OutputArgs {
    handle: String,
    from: usize,
    limit: usize,
}

impl Default for OutputArgs {
    fn default() -> Self {
        Self {
            handle: String::new(),
            from: 0,
            limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

#[async_trait]
impl Tool for GetCommandOutputTool {
    fn name(&self) -> &'static str {
        "get_command_output"
    }

    fn description(&self) -> &'static str {
        "Get buffered output from a running or completed command"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "handle": { "type": "string" },
                "from": { "type": "integer", "default": 0 },
                "limit": { "type": "integer", "default": 200 }
            },
            "required": ["handle"]
        })
    }

    fn policy_hint(&self) -> ToolPolicy {
        ToolPolicy::Allow
    }

    async fn execute(&self, args: &ArgMap, ctx: &ToolContext) -> ToolResult {
        let args: OutputArgs = match serde_json::from_value(Value::Object(args.clone())) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(codes::VALIDATION_ERROR, e.to_string()),
        };
        if args.handle.is_empty() {
            return ToolResult::error(codes::VALIDATION_ERROR, "handle is required");
        }

        let Some(tracked) = ctx.commands.get(&args.handle) else {
            return ToolResult::error(codes::FILE_NOT_FOUND, "command not found");
        };

        let entries = tracked.output_snapshot();
        let (done, exit_code) = tracked.status();
        let end = (args.from + args.limit).min(entries.len());
        let page: Vec<OutputEntry> = if args.from < entries.len() {
            entries[args.from..end].to_vec()
        } else {
            Vec::new()
        };

        ToolResult::success(json!({
            "lines": page,
            "next": end,
            "done": done,
            "exit_code": exit_code,
        }))
    }
}

// ---------------------------------------------------------------------------
// cancel_command
// ---------------------------------------------------------------------------

/// Tool that kills a running command.
pub struct CancelCommandTool;

#[derive(Default, Deserialize)]
#[serde(default)]
struct CancelArgs {
    handle: String,
}

#[async_trait]
impl Tool for CancelCommandTool {
    fn name(&self) -> &'static str {
        "cancel_command"
    }

    fn description(&self) -> &'static str {
        "Cancel a running command"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "handle": { "type": "string" }
            },
            "required": ["handle"]
        })
    }

    fn policy_hint(&self) -> ToolPolicy {
        ToolPolicy::Allow
    }

    async fn execute(&self, args: &ArgMap, ctx: &ToolContext) -> ToolResult {
        let args: CancelArgs = match serde_json::from_value(Value::Object(args.clone())) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(codes::VALIDATION_ERROR, e.to_string()),
        };
        if args.handle.is_empty() {
            return ToolResult::error(codes::VALIDATION_ERROR, "handle is required");
        }

        let Some(tracked) = ctx.commands.get(&args.handle) else {
            return ToolResult::error(codes::FILE_NOT_FOUND, "command not found");
        };

        tracked.request_cancel();
        tracked.mark_done(-1);

        ToolResult::success(json!({ "cancelled": true }))
    }
}
