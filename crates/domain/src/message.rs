use serde::{Deserialize, Serialize};

/// The two roles a neutral message can carry. Providers have more (system,
/// tool, function...) but the core only ever stores `user`/`assistant` —
/// system instructions and tool results are folded into content blocks of
/// a `user`/`assistant` message instead (see [`ContentBlock`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Marks a system-synthesized error message. `None` on ordinary messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FatalUpstream,
    StoreFailure,
}

/// One block of a neutral message's `content[]`. Discriminated on `type`
/// the way every provider dialect discriminates its own content union —
/// adapters translate 1:1 rather than inventing a different shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        text: String,
        /// Google-style thought signature, carried opaquely if present.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        /// Anthropic-style `{"type": "ephemeral"}` cache marker, carried
        /// opaquely and round-tripped without interpretation.
        #[serde(skip_serializing_if = "Option::is_none")]
        cache: Option<serde_json::Value>,
    },
    #[serde(rename = "thinking")]
    Thinking { thinking: String, signature: String },
    #[serde(rename = "redacted_thinking")]
    RedactedThinking { data: String, signature: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        tool_name: String,
        /// Always a JSON object, never null/absent once stored — the
        /// adapter normalizes empty accumulated input to `{}`.
        input_json: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache: Option<serde_json::Value>,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        is_error: bool,
        result: Vec<ContentBlock>,
        start_time: chrono::DateTime<chrono::Utc>,
        end_time: chrono::DateTime<chrono::Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        display: Option<String>,
    },
    #[serde(rename = "image")]
    Image {
        media_type: String,
        base64_data: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: text.into(),
            signature: None,
            cache: None,
        }
    }

    pub fn tool_use(id: impl Into<String>, tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            tool_name: tool_name.into(),
            input_json: input,
            signature: None,
            cache: None,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        is_error: bool,
        text: impl Into<String>,
        start_time: chrono::DateTime<chrono::Utc>,
        end_time: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            is_error,
            result: vec![ContentBlock::text(text)],
            start_time,
            end_time,
            display: None,
        }
    }

    /// The `tool_use_id` this block references, if it's a tool_result.
    pub fn tool_result_id(&self) -> Option<&str> {
        match self {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        }
    }

    /// The `id` this block defines, if it's a tool_use.
    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }

    /// Plain text contained in this block, if any (used for display / logs).
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }
}

/// The neutral message record exchanged with providers: what the adapter
/// (C2) sends and receives, independent of wire dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralMessage {
    pub role: Role,
    /// Assistant-only; true means this message terminates the turn.
    #[serde(default)]
    pub end_of_turn: bool,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl NeutralMessage {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            end_of_turn: false,
            content,
            error_kind: None,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>, end_of_turn: bool) -> Self {
        Self {
            role: Role::Assistant,
            end_of_turn,
            content,
            error_kind: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>, end_of_turn: bool) -> Self {
        Self::assistant(vec![ContentBlock::text(text)], end_of_turn)
    }

    /// All `tool_use` blocks in document order.
    pub fn tool_uses(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content.iter().filter(|b| b.is_tool_use())
    }

    /// All `tool_result` blocks in document order.
    pub fn tool_results(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content.iter().filter(|b| b.is_tool_result())
    }

    pub fn has_tool_uses(&self) -> bool {
        self.content.iter().any(|b| b.is_tool_use())
    }

    pub fn text_joined(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| b.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Additive token usage for a single provider response.
/// `context_window_used` = input + cache_creation_read + cache_read + output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_read_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    /// Estimated USD cost, when the provider's model has a pricing entry
    /// configured (`LlmConfig::pricing`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl Usage {
    pub fn context_window_used(&self) -> u64 {
        self.input_tokens + self.cache_creation_read_tokens + self.cache_read_tokens + self.output_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.cache_creation_read_tokens == 0 && self.cache_read_tokens == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn context_window_used_sums_all_components() {
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_read_tokens: 2,
            cache_read_tokens: 3,
            cost_usd: None,
        };
        assert_eq!(usage.context_window_used(), 20);
    }

    #[test]
    fn neutral_message_tool_uses_filters_correctly() {
        let now = Utc::now();
        let msg = NeutralMessage::assistant(
            vec![
                ContentBlock::text("let me check"),
                ContentBlock::tool_use("u1", "bash", serde_json::json!({"cmd": "ls"})),
                ContentBlock::tool_result("u1", false, "ok", now, now),
            ],
            false,
        );
        assert_eq!(msg.tool_uses().count(), 1);
        assert_eq!(msg.tool_results().count(), 1);
        assert!(msg.has_tool_uses());
    }

    #[test]
    fn tool_use_roundtrips_through_json() {
        let block = ContentBlock::tool_use("u1", "bash", serde_json::json!({}));
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"tool_use\""));
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_use_id(), Some("u1"));
    }
}
