//! Webforge — agent, tool, and terminal core for a browser-hosted IDE.
//!
//! This crate drives a tool-using LLM agent over a project directory: it
//! streams model output, executes sandboxed tools under an approval policy,
//! and backs the web terminal with persistent PTY sessions. The HTTP and
//! WebSocket surface, auth, and project registration live in the embedding
//! service; this crate is the engine underneath them.
//!
//! # Quick start
//!
//! ```no_run
//! use webforge::agent::Orchestrator;
//! use webforge::config::{load_config, AgentConfig, AgentMode};
//! use webforge::provider::make_provider;
//! use webforge::tools::ToolRegistry;
//! # use std::path::PathBuf;
//!
//! # async fn example() {
//! let config = load_config(None).unwrap();
//! let provider = make_provider("openai", &config.provider);
//! let orchestrator =
//!     Orchestrator::new(ToolRegistry::with_builtins(), provider, config.provider.clone());
//!
//! let session = orchestrator.sessions().create(
//!     uuid::Uuid::new_v4(),
//!     uuid::Uuid::new_v4(),
//!     uuid::Uuid::new_v4(),
//!     AgentConfig::for_project(&config, AgentMode::Safe, PathBuf::from("/srv/projects/demo")),
//! );
//! let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
//! let outcome = orchestrator.run(&session, "list the repo", &tx, None).await;
//! println!("{outcome:?}");
//! # }
//! ```

/// Orchestrator step loop and the event fabric.
pub mod agent;
/// Config loading, defaults, and per-session settings.
pub mod config;
/// Error types used across crate modules.
pub mod error;
/// Project-root path confinement.
pub mod pathguard;
/// Per-call allow/confirm/deny policy decisions.
pub mod policy;
/// Model-provider adapters and streaming chunk types.
pub mod provider;
/// Bounded byte FIFO backing terminal backlogs.
pub mod ringbuf;
/// Per-conversation session state and the session registry.
pub mod session;
/// Terminal PTY sessions, backlog, and control frames.
pub mod terminal;
#[cfg(test)]
/// Shared testing utilities compiled only for tests.
pub mod testsupport;
/// Built-in tool implementations and the tool registry.
pub mod tools;
/// Wire data model for OpenAI-compatible chat endpoints.
pub mod types;
