use crate::message::{NeutralMessage, Usage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation row. Identified by a stable opaque ID; lives forever
/// logically — managers (C6) come and go, the row does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd_hint: Option<String>,
    /// Set on the first turn; subsequent turns must match or the request
    /// is rejected with `ConversationModelMismatch`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_conversation_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Conversation {
    pub fn new(id: Uuid, cwd_hint: Option<String>, parent_conversation_id: Option<Uuid>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            slug: None,
            archived: false,
            cwd_hint,
            bound_model: None,
            parent_conversation_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// `kind` of a stored message — distinct from the neutral message's `role`.
/// `system`/`error` messages still carry a neutral `role` of `user` or
/// `assistant` for wire purposes (an error is recorded as an assistant
/// message with `error_kind` set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Agent,
    Tool,
    System,
    Error,
}

/// One entry in a conversation's append-only log (§3 Message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    /// Monotonic per conversation, gap-free, assigned at insert (I1).
    pub sequence_id: u64,
    pub kind: MessageKind,
    pub llm_payload: NeutralMessage,
    #[serde(default)]
    pub usage: Usage,
    /// Optional UI-only projection of tool results (e.g. truncated,
    /// rendered for a chat bubble); never sent to providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_payload: Option<serde_json::Value>,
    /// If true the Repairer (C3) omits this message from provider requests.
    #[serde(default)]
    pub excluded_from_context: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl StoredMessage {
    /// Whether this message has any unresolved `tool_use` — used by the
    /// seal step and the dangling-tool-use repair rule.
    pub fn tool_use_ids(&self) -> Vec<String> {
        self.llm_payload
            .tool_uses()
            .filter_map(|b| b.tool_use_id().map(str::to_string))
            .collect()
    }

    pub fn tool_result_ids(&self) -> Vec<String> {
        self.llm_payload
            .tool_results()
            .filter_map(|b| b.tool_result_id().map(str::to_string))
            .collect()
    }
}
