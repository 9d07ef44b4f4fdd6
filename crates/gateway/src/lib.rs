//! agentcore gateway: HTTP surface, conversation runtime, and process
//! bootstrap for the `agentcored` binary.

pub mod api;
pub mod bootstrap;
pub mod runtime;
pub mod state;
