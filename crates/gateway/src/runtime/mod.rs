//! The runtime: C6 (conversation manager) and C7 (manager registry), plus
//! the cancellation primitive and tool catalog they share.

pub mod cancel;
pub mod catalog;
pub mod manager;
pub mod registry;
pub mod subagent;

use ac_domain::conversation::StoredMessage;
use serde::Serialize;

/// What flows through [`ac_store::Subpub`] for a conversation. `Message`
/// rides the sequenced `publish` channel (exactly-once, never silently
/// dropped); `WorkingStateChange` rides `broadcast` (best-effort — a
/// missed one is corrected by the next state change or by polling
/// `GET /conversation/{id}`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum SubpubEvent {
    Message(StoredMessage),
    WorkingStateChange {
        working: bool,
        model: Option<String>,
    },
}
