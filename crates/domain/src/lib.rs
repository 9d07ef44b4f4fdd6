//! Shared domain types for agentcore: the neutral message model, the
//! conversation/transcript records, and configuration.
//!
//! Every other crate in the workspace depends on this one; it has no
//! dependency on any of them.

pub mod capability;
pub mod config;
pub mod conversation;
pub mod error;
pub mod message;
pub mod trace;

pub use capability::ProviderCapabilities;
pub use config::Config;
pub use conversation::{Conversation, MessageKind, StoredMessage};
pub use error::{Error, Result};
pub use message::{ContentBlock, ErrorKind, NeutralMessage, Role, Usage};
pub use trace::TraceEvent;
