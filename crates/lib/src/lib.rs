//! Relay core library: forwards a fetch request to third-party responder bots over a
//! shared messaging transport and rebuilds a result from their replies.
//!
//! Flow: `AgentDispatcher` → (per candidate) `InteractionWorkflow` → `ResponseWatcher`
//! (`EventCursor` + `MessageClassifier`) and `resolve_choice` → `ResultAssembler`.

pub mod assembler;
pub mod choice;
pub mod classify;
pub mod command;
pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod init;
pub mod platform;
pub mod transport;
pub mod watcher;
pub mod workflow;

pub use dispatcher::{AgentDispatcher, AgentFailure, Resolution, ResolveError};
pub use platform::Platform;
pub use workflow::{FailureReason, RequestKind};
