//! Durable transcript storage (C1) and per-conversation publish/subscribe
//! fan-out (C5) — §4.1, §4.5.
//!
//! `TranscriptStore` is the only place conversation rows and messages are
//! persisted; `Subpub` is a pure in-memory primitive with no store
//! dependency of its own (the gateway wires one to the other).

pub mod subpub;
pub mod transcript;

pub use subpub::{Subpub, SubpubFrame, Subscription};
pub use transcript::TranscriptStore;
