//! C2 Provider Adapter (§4.2): the neutral request/response model, the
//! streaming SSE assembler, retry/backoff, and capping, plus one adapter
//! per supported wire dialect.

pub mod anthropic;
pub mod capping;
pub mod openai_compat;
pub mod request;
pub mod retry;
pub(crate) mod sse;
pub(crate) mod util;

pub use request::{
    Adapter, NeutralRequest, NeutralResponse, RequestContext, ToolChoice, ToolDefinition,
};

use std::collections::HashMap;
use std::sync::Arc;

use ac_domain::config::llm::{LlmConfig, ModelPricing, ProviderKind};
use ac_domain::error::{Error, Result};

/// Builds the configured [`Adapter`] for a single provider row. One call
/// site for both CLI startup and tests — keeps the `ProviderKind` match in
/// exactly one place. `timeout_ms` is the per-attempt HTTP timeout
/// ([`LlmConfig::default_timeout_ms`]); `pricing` is the per-model USD
/// table the adapter consults for cost annotation (§4.2).
pub fn adapter_for(
    cfg: &ac_domain::config::llm::ProviderConfig,
    timeout_ms: u64,
    pricing: HashMap<String, ModelPricing>,
) -> Result<Arc<dyn Adapter>> {
    match cfg.kind {
        ProviderKind::Anthropic => Ok(Arc::new(anthropic::AnthropicAdapter::from_config(
            cfg, timeout_ms, pricing,
        )?)),
        ProviderKind::OpenaiCompat => Ok(Arc::new(openai_compat::OpenAiCompatAdapter::from_config(
            cfg, timeout_ms, pricing,
        )?)),
    }
}

/// Builds every configured provider, keyed by its `id`. The gateway looks
/// up the conversation's bound model's provider id here. Every adapter
/// gets the full pricing table — a provider only ever looks up the model
/// names it actually serves.
pub fn adapters_from_config(config: &LlmConfig) -> Result<HashMap<String, Arc<dyn Adapter>>> {
    let mut out = HashMap::new();
    for provider_cfg in &config.providers {
        if out.contains_key(&provider_cfg.id) {
            return Err(Error::Config(format!(
                "duplicate provider id: {}",
                provider_cfg.id
            )));
        }
        out.insert(
            provider_cfg.id.clone(),
            adapter_for(provider_cfg, config.default_timeout_ms, config.pricing.clone())?,
        );
    }
    Ok(out)
}
