//! The tool catalog advertised to the provider on every turn. Declarative
//! JSON-schema descriptions only — dispatch itself lives entirely in
//! `ac_tools::ToolExecutor`; this module exists so the loop (C6) can
//! build a `NeutralRequest.tools` list without reaching into the tool
//! crate's internals.

use ac_providers::ToolDefinition;
use serde_json::json;

pub fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "bash".into(),
            description: "Run a shell command in the conversation's working directory.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "workdir": {"type": "string"},
                    "yield_ms": {"type": "integer", "description": "Foreground wait before auto-backgrounding."}
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: "read_file".into(),
            description: "Read a file scoped to the workspace root.".into(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "write_file".into(),
            description: "Write (overwrite) a file scoped to the workspace root.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "append_file".into(),
            description: "Append to a file scoped to the workspace root.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "move_file".into(),
            description: "Move or rename a file within the workspace root.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "from": {"type": "string"},
                    "to": {"type": "string"}
                },
                "required": ["from", "to"]
            }),
        },
        ToolDefinition {
            name: "delete_file".into(),
            description: "Delete a file within the workspace root.".into(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "list_dir".into(),
            description: "List a directory within the workspace root.".into(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "agent".into(),
            description: "Delegate a sub-task to a new child conversation and return its final answer.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"},
                    "model": {"type": "string"},
                    "cwd": {"type": "string"}
                },
                "required": ["message"]
            }),
        },
    ]
}
