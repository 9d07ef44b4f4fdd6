use serde::{Deserialize, Serialize};

/// Per-provider capabilities used by the adapter when capping requests
/// (§4.2 Capping) — what the model can actually accept, independent of
/// what the caller asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: true,
            supports_streaming: true,
            context_window_tokens: None,
            max_output_tokens: None,
        }
    }
}
