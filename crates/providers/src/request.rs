//! The neutral request/response model exchanged between the conversation
//! manager (C6) and a provider adapter (C2) — §4.2.

use ac_domain::message::{ContentBlock, NeutralMessage, Usage};
use serde::{Deserialize, Serialize};

/// What the caller wants the model to do about tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

impl Default for ToolChoice {
    fn default() -> Self {
        ToolChoice::Auto
    }
}

/// One tool the model may call, in wire-neutral form (JSON Schema
/// parameters — every provider's tool declaration reduces to this shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// `do(ctx, neutral_request) → neutral_response | error` — the request
/// half (§4.2).
#[derive(Debug, Clone)]
pub struct NeutralRequest {
    pub model: String,
    pub system: Vec<ContentBlock>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub messages: Vec<NeutralMessage>,
    /// Caller's cap; the adapter re-caps against the provider/model limit
    /// (§4.2 Capping).
    pub max_output_tokens: u32,
    pub thinking_budget: Option<u32>,
    pub stop_sequences: Vec<String>,
}

/// The response half. `usage` carries cost annotation when the provider's
/// response included a cost-reporting header.
#[derive(Debug, Clone)]
pub struct NeutralResponse {
    pub message: NeutralMessage,
    pub usage: Usage,
    pub model: String,
    pub stop_reason: Option<String>,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
}

/// Per-call context threaded through an adapter invocation: cancellation
/// and (later) anything else a call needs that isn't part of the request
/// payload itself.
#[derive(Clone)]
pub struct RequestContext {
    pub cancel: tokio_util::sync::CancellationToken,
}

impl RequestContext {
    pub fn new(cancel: tokio_util::sync::CancellationToken) -> Self {
        Self { cancel }
    }
}

/// Implemented once per provider dialect (Anthropic, OpenAI-compatible...).
/// The only entry point the rest of the workspace calls.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        request: NeutralRequest,
    ) -> ac_domain::error::Result<NeutralResponse>;

    fn provider_id(&self) -> &str;

    fn capabilities(&self) -> &ac_domain::capability::ProviderCapabilities;
}
