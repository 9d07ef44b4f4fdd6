//! Shared application state passed to every API handler.

use std::collections::HashMap;
use std::sync::Arc;

use ac_domain::config::Config;
use ac_providers::Adapter;
use ac_store::{Subpub, TranscriptStore};
use ac_tools::ToolExecutor;

use crate::runtime::registry::ManagerRegistry;
use crate::runtime::SubpubEvent;

/// Everything the conversation manager (C6) and the HTTP layer need,
/// cloned cheaply (every field is an `Arc`) into each handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Registered LLM providers, keyed by `ProviderConfig::id`. A bound
    /// model is the string `"<provider_id>/<model_name>"`; the manager
    /// splits on the first `/` to find the adapter.
    pub adapters: Arc<HashMap<String, Arc<dyn Adapter>>>,
    pub store: Arc<TranscriptStore>,
    pub subpub: Arc<Subpub<SubpubEvent>>,
    pub tools: Arc<ToolExecutor>,
    pub registry: Arc<ManagerRegistry>,
}

impl AppState {
    /// The model ID to bind a brand new conversation to when the caller
    /// doesn't specify one explicitly: the first configured provider,
    /// unqualified (an unqualified provider ID asks that adapter to use
    /// its own configured default model — see [`split_model_id`]).
    pub fn default_model(&self) -> Option<String> {
        self.config
            .llm
            .providers
            .first()
            .map(|p| p.id.clone())
    }

    /// Look up the adapter for a bound model ID of the form
    /// `"<provider_id>"` or `"<provider_id>/<model_name>"`.
    pub fn adapter_for_model(&self, model_id: &str) -> Option<Arc<dyn Adapter>> {
        let provider_id = model_id.split('/').next().unwrap_or(model_id);
        self.adapters.get(provider_id).cloned()
    }
}

/// Split a bound model ID into `(provider_id, model_name)`. `model_name`
/// is empty when the ID is an unqualified provider ID — adapters treat
/// an empty `NeutralRequest::model` as "use my configured default".
pub fn split_model_id(model_id: &str) -> (&str, &str) {
    match model_id.split_once('/') {
        Some((provider, model)) => (provider, model),
        None => (model_id, ""),
    }
}
