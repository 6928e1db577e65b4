//! Interactive terminal core.
//!
//! Each terminal session owns a pseudo-terminal running a shell, a ring
//! buffer of recent output for reattachment, and a background reader that
//! drains the PTY. Sessions are registered in a [`TerminalTable`] and
//! garbage-collected after prolonged inactivity.

use crate::config::TerminalConfig;
use crate::ringbuf::RingBuffer;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

/// PTY read chunk size.
const READ_CHUNK: usize = 1024;
/// Initial window size before the client negotiates one.
const DEFAULT_SIZE: PtySize = PtySize {
    rows: 24,
    cols: 80,
    pixel_width: 0,
    pixel_height: 0,
};

/// Errors from terminal lifecycle operations.
#[derive(Debug)]
pub enum TerminalError {
    /// PTY allocation or shell spawn failed.
    Spawn(String),
    /// The session has already been closed.
    Closed,
    /// No session with the given id.
    NotFound,
    /// Read/write against the PTY failed.
    Io(std::io::Error),
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(msg) => write!(f, "failed to start terminal: {msg}"),
            Self::Closed => write!(f, "terminal session is closed"),
            Self::NotFound => write!(f, "terminal session not found"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for TerminalError {}

impl From<std::io::Error> for TerminalError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Lifecycle state of a terminal session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Running,
    Closed,
}

/// One live terminal: a shell on a PTY with a bounded output backlog.
pub struct TerminalSession {
    /// Opaque session id.
    pub id: Uuid,
    /// Project this terminal belongs to.
    pub project_id: Uuid,
    /// Display title.
    pub title: String,
    /// Working directory the shell started in.
    pub cwd: String,
    /// Shell binary.
    pub shell: String,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
    status: Mutex<TerminalStatus>,
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    buffer: RingBuffer,
    last_activity: AtomicU64,
}

impl TerminalSession {
    /// Forward input bytes to the shell.
    pub fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        if self.status() == TerminalStatus::Closed {
            return Err(TerminalError::Closed);
        }
        let mut writer = self.writer.lock().expect("writer lock");
        writer.write_all(data)?;
        writer.flush()?;
        self.touch();
        Ok(())
    }

    /// Negotiate the window size.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        if self.status() == TerminalStatus::Closed {
            return Err(TerminalError::Closed);
        }
        self.master
            .lock()
            .expect("master lock")
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;
        self.touch();
        Ok(())
    }

    /// Snapshot of the buffered backlog.
    pub fn backlog(&self) -> Vec<u8> {
        self.buffer.read_all()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TerminalStatus {
        *self.status.lock().expect("status lock")
    }

    /// Milliseconds since the last read or write.
    pub fn idle_millis(&self) -> u64 {
        now_millis().saturating_sub(self.last_activity.load(Ordering::Relaxed))
    }

    /// Dispatch one inbound transport message. Framed control messages act
    /// on the session; bytes that do not parse as a frame fall through to
    /// the PTY as raw stdin. Returns the reply frame to send back, when one
    /// is due.
    pub fn handle_frame(&self, raw: &[u8]) -> Result<Option<TermFrame>, TerminalError> {
        let Ok(frame) = parse_frame(raw) else {
            // Clients may send bare keystrokes without JSON framing.
            self.write(raw)?;
            return Ok(None);
        };
        match frame {
            TermFrame::Stdin { data } => {
                self.write(data.as_bytes())?;
                Ok(None)
            }
            TermFrame::Resize { cols, rows } => {
                if cols > 0 && rows > 0 {
                    self.resize(cols, rows)?;
                }
                Ok(None)
            }
            TermFrame::Ping => Ok(Some(TermFrame::Pong)),
            // Outbound-only frames arriving inbound are ignored.
            TermFrame::Pong | TermFrame::Stdout { .. } => Ok(None),
        }
    }

    /// Kill the shell, reap it, and mark the session closed. Idempotent.
    pub fn close(&self) {
        {
            let mut status = self.status.lock().expect("status lock");
            if *status == TerminalStatus::Closed {
                return;
            }
            *status = TerminalStatus::Closed;
        }
        let mut child = self.child.lock().expect("child lock");
        if let Err(e) = child.kill() {
            debug!(error = %e, "terminal child kill failed (already gone?)");
        }
        let _ = child.wait();
        debug!(terminal = %self.id, "terminal session closed");
    }

    fn mark_closed(&self) {
        *self.status.lock().expect("status lock") = TerminalStatus::Closed;
    }

    fn touch(&self) {
        self.last_activity.store(now_millis(), Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry of live terminal sessions.
pub struct TerminalTable {
    config: TerminalConfig,
    inner: RwLock<std::collections::HashMap<Uuid, Arc<TerminalSession>>>,
}

impl TerminalTable {
    pub fn new(config: TerminalConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Start a shell on a fresh PTY and register the session.
    pub fn create(
        &self,
        project_id: Uuid,
        cwd: &str,
        title: &str,
        shell: &str,
    ) -> Result<Arc<TerminalSession>, TerminalError> {
        let shell = if shell.is_empty() {
            self.config.shell.as_str()
        } else {
            shell
        };

        let pty = native_pty_system()
            .openpty(DEFAULT_SIZE)
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;

        let mut command = CommandBuilder::new(shell);
        command.arg("-i");
        command.env("TERM", "xterm-256color");
        if !cwd.is_empty() {
            command.cwd(cwd);
        }

        let child = pty
            .slave
            .spawn_command(command)
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;
        drop(pty.slave);

        let mut reader = pty
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;
        let writer = pty
            .master
            .take_writer()
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;

        let session = Arc::new(TerminalSession {
            id: Uuid::new_v4(),
            project_id,
            title: title.to_string(),
            cwd: cwd.to_string(),
            shell: shell.to_string(),
            created_at: now_millis(),
            status: Mutex::new(TerminalStatus::Running),
            writer: Mutex::new(writer),
            master: Mutex::new(pty.master),
            child: Mutex::new(child),
            buffer: RingBuffer::new(self.config.ring_capacity),
            last_activity: AtomicU64::new(now_millis()),
        });

        self.inner
            .write()
            .expect("table lock")
            .insert(session.id, Arc::clone(&session));
        debug!(terminal = %session.id, shell, "terminal session created");

        // Single background reader per session: drain the PTY into the ring
        // until EOF, which marks the session closed.
        let reader_session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || {
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => {
                        reader_session.mark_closed();
                        return;
                    }
                    Ok(n) => {
                        reader_session.buffer.write(&chunk[..n]);
                        reader_session.touch();
                    }
                    Err(e) => {
                        if reader_session.status() == TerminalStatus::Running {
                            warn!(terminal = %reader_session.id, error = %e, "terminal read failed");
                            reader_session.mark_closed();
                        }
                        return;
                    }
                }
            }
        });

        Ok(session)
    }

    /// Look up a session by id.
    pub fn get(&self, id: Uuid) -> Result<Arc<TerminalSession>, TerminalError> {
        self.inner
            .read()
            .expect("table lock")
            .get(&id)
            .cloned()
            .ok_or(TerminalError::NotFound)
    }

    /// All running sessions for one project.
    pub fn sessions_for_project(&self, project_id: Uuid) -> Vec<Arc<TerminalSession>> {
        self.inner
            .read()
            .expect("table lock")
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect()
    }

    /// Close a session and drop it from the registry.
    pub fn close(&self, id: Uuid) -> Result<(), TerminalError> {
        let session = {
            self.inner
                .write()
                .expect("table lock")
                .remove(&id)
                .ok_or(TerminalError::NotFound)?
        };
        session.close();
        Ok(())
    }

    /// Close every session whose last activity is older than `max_age`.
    /// Returns the ids collected.
    pub fn cleanup_idle(&self, max_age: Duration) -> Vec<Uuid> {
        let cutoff = max_age.as_millis() as u64;
        let doomed: Vec<Uuid> = {
            self.inner
                .read()
                .expect("table lock")
                .values()
                .filter(|s| s.idle_millis() > cutoff)
                .map(|s| s.id)
                .collect()
        };
        for id in &doomed {
            let _ = self.close(*id);
        }
        doomed
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.inner.read().expect("table lock").len()
    }

    /// True when no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Reattachment
// ---------------------------------------------------------------------------

/// Tracks how much backlog one transport has already seen. The first call
/// returns the whole snapshot; later calls return only newly appended bytes.
pub struct BacklogCursor {
    session: Arc<TerminalSession>,
    seen: usize,
}

impl BacklogCursor {
    pub fn new(session: Arc<TerminalSession>) -> Self {
        Self { session, seen: 0 }
    }

    /// Bytes appended since the previous call, if any.
    pub fn next_delta(&mut self) -> Option<Vec<u8>> {
        let snapshot = self.session.backlog();
        if snapshot.len() <= self.seen {
            return None;
        }
        let delta = snapshot[self.seen..].to_vec();
        self.seen = snapshot.len();
        Some(delta)
    }
}

// ---------------------------------------------------------------------------
// Control-frame codec
// ---------------------------------------------------------------------------

/// Framed control messages on the terminal channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TermFrame {
    /// Keystrokes from the client.
    Stdin { data: String },
    /// Window-size negotiation.
    Resize { cols: u16, rows: u16 },
    /// Client liveness probe.
    Ping,
    /// Server answer to a ping.
    Pong,
    /// Shell output for consumers that need JSON framing; the raw byte
    /// stream remains the primary output path.
    Stdout { data: String },
}

/// Parse one framed JSON message.
pub fn parse_frame(data: &[u8]) -> Result<TermFrame, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize one control frame.
pub fn format_frame(frame: &TermFrame) -> Vec<u8> {
    serde_json::to_vec(frame).unwrap_or_default()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
