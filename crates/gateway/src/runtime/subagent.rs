//! Bridges `ac_tools::SubAgentSpawner` to the Manager Registry so the
//! `agent` tool can recurse into a brand new child conversation without
//! `ac-tools` depending on `ac-gateway` (§9 Sub-agent recursion).

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ac_store::TranscriptStore;
use ac_tools::SubAgentSpawner;
use async_trait::async_trait;
use uuid::Uuid;

use crate::runtime::registry::ManagerRegistry;

/// Constructed before the [`ManagerRegistry`] it delegates to (the
/// registry itself needs a fully-built [`ac_tools::ToolExecutor`], which
/// needs this spawner) — `registry` is filled in once, right after, via
/// [`RegistrySpawner::bind_registry`].
pub struct RegistrySpawner {
    pub store: Arc<TranscriptStore>,
    registry: OnceLock<Arc<ManagerRegistry>>,
    pub default_model: Option<String>,
}

impl RegistrySpawner {
    pub fn new(store: Arc<TranscriptStore>, default_model: Option<String>) -> Self {
        Self {
            store,
            registry: OnceLock::new(),
            default_model,
        }
    }

    /// Must be called exactly once, before any conversation turn can
    /// invoke the `agent` tool.
    pub fn bind_registry(&self, registry: Arc<ManagerRegistry>) {
        let _ = self.registry.set(registry);
    }
}

#[async_trait]
impl SubAgentSpawner for RegistrySpawner {
    async fn run_child_turn(
        &self,
        parent_conversation_id: Uuid,
        model: Option<String>,
        message: String,
        cwd: Option<String>,
    ) -> Result<String, String> {
        let model = model
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| "no model available to bind the sub-agent to".to_owned())?;
        let registry = self
            .registry
            .get()
            .ok_or_else(|| "sub-agent registry not yet initialized".to_owned())?;

        let child_id = Uuid::new_v4();
        self.store
            .create_conversation(child_id, cwd, Some(parent_conversation_id))
            .map_err(|e| e.to_string())?;

        let manager = registry.get_or_create(child_id).map_err(|e| e.to_string())?;
        manager
            .accept_user_message(&model, message)
            .map_err(|e| e.to_string())?;

        // The loop runs on its own spawned task; poll until it returns to
        // Idle. A sub-agent call is itself invoked from inside a tool
        // dispatch, so this is already running off the parent's loop task.
        for _ in 0..6000 {
            if !manager.is_working() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if manager.is_working() {
            return Err("sub-agent timed out".to_owned());
        }

        let history = self.store.list(child_id).map_err(|e| e.to_string())?;
        let answer = history
            .iter()
            .rev()
            .find(|m| matches!(m.kind, ac_domain::conversation::MessageKind::Agent))
            .map(|m| m.llm_payload.text_joined())
            .unwrap_or_default();
        Ok(answer)
    }
}
