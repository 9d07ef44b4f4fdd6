//! Built-in tool catalog for agentcore.
//!
//! Implements C4 (Tool Executor): `execute(ctx, tool_use_block,
//! conversation_context) -> tool_result_block`, plus the concrete tools the
//! executor dispatches to — `bash` (foreground/background shell execution,
//! via [`exec`]/[`manager`]), scoped file I/O (`read_file`, `write_file`,
//! `list_dir`), a stub `browser` tool, and an `agent` tool that recurses
//! into the host's Manager Registry through [`SubAgentSpawner`] so this
//! crate never depends on `ac-gateway`.

pub mod exec;
pub mod executor;
pub mod file_ops;
pub mod manager;

pub use executor::{SubAgentSpawner, ToolExecutor};
pub use manager::ProcessManager;
