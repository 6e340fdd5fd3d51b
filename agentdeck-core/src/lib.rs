//! # agentdeck-core
//!
//! Core library for agentdeck - live reconstruction and control of Claude
//! Code sessions from their on-disk transcripts.
//!
//! This library provides:
//! - Transcript parsing for the append-only JSONL session format
//! - Session discovery over the `~/.claude/projects` tree
//! - Incremental tailing that turns transcript appends into events
//! - Subprocess control for resuming, steering, and forking sessions
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! The session files are the single source of truth: the repository rebuilds
//! state from them on demand, the tailer streams their growth, and even a
//! controlled subprocess's own transcript writes flow back through the same
//! files. Components communicate through one event channel; nothing here
//! persists state of its own.
//!
//! ## Example
//!
//! ```rust,no_run
//! use agentdeck_core::{Config, SessionRepository};
//!
//! let config = Config::load().expect("failed to load config");
//! let mut repo = SessionRepository::new(&config.claude);
//! for session in repo.discover().expect("discovery failed") {
//!     println!("{} {}", session.id, session.workspace_name);
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use control::ProcessController;
pub use error::{Error, Result};
pub use events::{EventReceiver, EventSender, SessionEvent, StructuredOutput};
pub use repo::SessionRepository;
pub use tail::TranscriptTailer;
pub use types::*;

// Public modules
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod logging;
pub mod repo;
pub mod tail;
pub mod transcript;
pub mod types;
