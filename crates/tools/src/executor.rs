//! C4 Tool Executor — `execute(ctx, tool_use_block, conversation_context) ->
//! tool_result_block` (§4.4).
//!
//! The executor is the only place in the workspace that knows the concrete
//! tool catalog; everything upstream (the conversation manager) only ever
//! sees [`ContentBlock::ToolUse`] in and [`ContentBlock::ToolResult`] out.

use std::path::PathBuf;
use std::sync::Arc;

use ac_domain::config::ToolsConfig;
use ac_domain::message::ContentBlock;
use chrono::Utc;
use regex::RegexSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::exec::{self, ExecRequest};
use crate::file_ops::{self, FileAppendRequest, FileDeleteRequest, FileListRequest, FileMoveRequest, FileReadRequest, FileWriteRequest};
use crate::manager::ProcessManager;

/// Implemented by the host (`ac-gateway`) so the `agent` tool can recurse
/// into the Manager Registry without this crate depending on it (§4.4,
/// §9 Sub-agent recursion).
#[async_trait::async_trait]
pub trait SubAgentSpawner: Send + Sync {
    /// Run a one-shot child conversation turn to completion and return its
    /// final assistant text (or an error string for a normal tool_result).
    async fn run_child_turn(
        &self,
        parent_conversation_id: Uuid,
        model: Option<String>,
        message: String,
        cwd: Option<String>,
    ) -> Result<String, String>;
}

pub struct ToolExecutor {
    workspace_root: PathBuf,
    process_manager: Arc<ProcessManager>,
    denied: RegexSet,
    sub_agents: Option<Arc<dyn SubAgentSpawner>>,
}

impl ToolExecutor {
    pub fn new(config: &ToolsConfig, sub_agents: Option<Arc<dyn SubAgentSpawner>>) -> Self {
        let denied = RegexSet::new(&config.exec_security.denied_patterns)
            .unwrap_or_else(|_| RegexSet::empty());
        Self {
            workspace_root: config.workspace_root.clone(),
            process_manager: Arc::new(ProcessManager::new(config.exec.clone())),
            denied,
            sub_agents,
        }
    }

    pub fn process_manager(&self) -> &Arc<ProcessManager> {
        &self.process_manager
    }

    /// Run the named tool and return the `tool_result` block that closes it.
    /// Never panics: any internal failure becomes `is_error = true`.
    pub async fn execute(
        &self,
        tool_use: &ContentBlock,
        conversation_id: Uuid,
        cwd: Option<&str>,
        cancel: CancellationToken,
    ) -> ContentBlock {
        let ContentBlock::ToolUse {
            id, tool_name, input_json, ..
        } = tool_use
        else {
            return error_result("", Utc::now(), "execute() called on a non-tool_use block");
        };

        let start = Utc::now();
        tokio::select! {
            _ = cancel.cancelled() => {
                cancelled_result(id, start)
            }
            outcome = self.dispatch(tool_name, input_json.clone(), conversation_id, cwd) => {
                let end = Utc::now();
                match outcome {
                    Ok(body) => ContentBlock::tool_result(id.clone(), false, body, start, end),
                    Err(body) => ContentBlock::tool_result(id.clone(), true, body, start, end),
                }
            }
        }
    }

    async fn dispatch(
        &self,
        tool_name: &str,
        input: serde_json::Value,
        conversation_id: Uuid,
        cwd: Option<&str>,
    ) -> Result<String, String> {
        match tool_name {
            "bash" => self.run_bash(input, cwd).await,
            "read_file" => {
                let req: FileReadRequest = parse(input)?;
                file_ops::file_read(&self.workspace_root, req)
                    .await
                    .map(pretty)
            }
            "write_file" => {
                let req: FileWriteRequest = parse(input)?;
                file_ops::file_write(&self.workspace_root, req)
                    .await
                    .map(pretty)
            }
            "append_file" => {
                let req: FileAppendRequest = parse(input)?;
                file_ops::file_append(&self.workspace_root, req)
                    .await
                    .map(pretty)
            }
            "move_file" => {
                let req: FileMoveRequest = parse(input)?;
                file_ops::file_move(&self.workspace_root, req)
                    .await
                    .map(pretty)
            }
            "delete_file" => {
                let req: FileDeleteRequest = parse(input)?;
                file_ops::file_delete(&self.workspace_root, req)
                    .await
                    .map(pretty)
            }
            "list_dir" => {
                let req: FileListRequest = parse(input)?;
                file_ops::file_list(&self.workspace_root, req)
                    .await
                    .map(pretty)
            }
            "browser" => Err("browser control is not implemented in this deployment".to_owned()),
            "agent" => self.run_sub_agent(input, conversation_id, cwd).await,
            other => Err(format!("unknown tool: {other}")),
        }
    }

    async fn run_bash(&self, input: serde_json::Value, cwd: Option<&str>) -> Result<String, String> {
        let mut req: ExecRequest = parse(input)?;
        if self.denied.is_match(&req.command) {
            return Err(format!(
                "command rejected by security policy: {}",
                req.command
            ));
        }
        if req.workdir.is_none() {
            req.workdir = cwd.map(str::to_owned);
        }
        let resp = exec::exec(&self.process_manager, req).await;
        let value = serde_json::to_value(&resp).map_err(|e| e.to_string())?;
        Ok(pretty(value))
    }

    async fn run_sub_agent(
        &self,
        input: serde_json::Value,
        conversation_id: Uuid,
        cwd: Option<&str>,
    ) -> Result<String, String> {
        let Some(spawner) = &self.sub_agents else {
            return Err("no sub-agent spawner configured".to_owned());
        };
        let req: SubAgentRequest = parse(input)?;
        spawner
            .run_child_turn(
                conversation_id,
                req.model,
                req.message,
                req.cwd.or_else(|| cwd.map(str::to_owned)),
            )
            .await
    }
}

#[derive(serde::Deserialize)]
struct SubAgentRequest {
    message: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
}

fn parse<T: serde::de::DeserializeOwned>(input: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(input).map_err(|e| format!("invalid tool input: {e}"))
}

fn pretty(v: serde_json::Value) -> String {
    serde_json::to_string(&v).unwrap_or_else(|_| v.to_string())
}

fn error_result(id: &str, at: chrono::DateTime<Utc>, body: &str) -> ContentBlock {
    ContentBlock::tool_result(id.to_owned(), true, body.to_owned(), at, at)
}

/// Body mandated verbatim by §4.4 for a mid-execution cancellation.
fn cancelled_result(id: &str, start: chrono::DateTime<Utc>) -> ContentBlock {
    ContentBlock::tool_result(
        id.to_owned(),
        true,
        "Tool execution cancelled by user",
        start,
        Utc::now(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ToolsConfig {
        let mut cfg = ToolsConfig::default();
        cfg.workspace_root = std::env::temp_dir();
        cfg
    }

    #[tokio::test]
    async fn unknown_tool_is_a_normal_error_result() {
        let exec = ToolExecutor::new(&config(), None);
        let block = ContentBlock::tool_use("call-1", "does-not-exist", serde_json::json!({}));
        let result = exec
            .execute(&block, Uuid::new_v4(), None, CancellationToken::new())
            .await;
        match result {
            ContentBlock::ToolResult { is_error, result, .. } => {
                assert!(is_error);
                assert!(result[0].as_text().unwrap().contains("unknown tool"));
            }
            _ => panic!("expected tool_result"),
        }
    }

    #[tokio::test]
    async fn bash_echo_succeeds() {
        let exec = ToolExecutor::new(&config(), None);
        let block = ContentBlock::tool_use(
            "call-1",
            "bash",
            serde_json::json!({"command": "echo hi", "yield_ms": 2000}),
        );
        let result = exec
            .execute(&block, Uuid::new_v4(), None, CancellationToken::new())
            .await;
        match result {
            ContentBlock::ToolResult { is_error, .. } => assert!(!is_error),
            _ => panic!("expected tool_result"),
        }
    }

    #[tokio::test]
    async fn denied_command_is_rejected() {
        let mut cfg = config();
        cfg.exec_security.denied_patterns = vec![r"rm\s+-rf\s+/".into()];
        let exec = ToolExecutor::new(&cfg, None);
        let block = ContentBlock::tool_use(
            "call-1",
            "bash",
            serde_json::json!({"command": "rm -rf /", "yield_ms": 1000}),
        );
        let result = exec
            .execute(&block, Uuid::new_v4(), None, CancellationToken::new())
            .await;
        match result {
            ContentBlock::ToolResult { is_error, result, .. } => {
                assert!(is_error);
                assert!(result[0].as_text().unwrap().contains("rejected"));
            }
            _ => panic!("expected tool_result"),
        }
    }

    #[tokio::test]
    async fn cancellation_returns_prompt_error_with_fixed_body() {
        let exec = ToolExecutor::new(&config(), None);
        let token = CancellationToken::new();
        token.cancel();
        let block = ContentBlock::tool_use(
            "call-1",
            "bash",
            serde_json::json!({"command": "sleep 5", "yield_ms": 5000}),
        );
        let result = exec.execute(&block, Uuid::new_v4(), None, token).await;
        match result {
            ContentBlock::ToolResult { is_error, result, .. } => {
                assert!(is_error);
                assert_eq!(result[0].as_text().unwrap(), "Tool execution cancelled by user");
            }
            _ => panic!("expected tool_result"),
        }
    }

    #[tokio::test]
    async fn missing_sub_agent_spawner_is_a_tool_error() {
        let exec = ToolExecutor::new(&config(), None);
        let block = ContentBlock::tool_use(
            "call-1",
            "agent",
            serde_json::json!({"message": "hello"}),
        );
        let result = exec
            .execute(&block, Uuid::new_v4(), None, CancellationToken::new())
            .await;
        match result {
            ContentBlock::ToolResult { is_error, .. } => assert!(is_error),
            _ => panic!("expected tool_result"),
        }
    }
}
