//! C7 Manager Registry: single-flight `get_or_create` over `ConversationManager`
//! instances, plus a background idle-eviction sweeper (§4.7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ac_domain::config::RegistryConfig;
use ac_domain::error::{Error, Result};
use ac_providers::Adapter;
use ac_store::{Subpub, TranscriptStore};
use ac_tools::ToolExecutor;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::runtime::manager::ConversationManager;
use crate::runtime::SubpubEvent;

struct Entry {
    manager: Arc<ConversationManager>,
    last_activity: Instant,
}

struct Shared {
    store: Arc<TranscriptStore>,
    subpub: Arc<Subpub<SubpubEvent>>,
    adapters: Arc<HashMap<String, Arc<dyn Adapter>>>,
    tools: Arc<ToolExecutor>,
}

/// Keeps at most one live [`ConversationManager`] per conversation ID.
/// Idle (non-`Working`) managers older than `idle_eviction_minutes` are
/// dropped by a background sweep so a long-lived gateway process doesn't
/// accumulate one manager per conversation ever created.
pub struct ManagerRegistry {
    entries: Mutex<HashMap<Uuid, Entry>>,
    shared: Shared,
    idle_eviction: Duration,
}

impl ManagerRegistry {
    pub fn new(
        config: &RegistryConfig,
        store: Arc<TranscriptStore>,
        subpub: Arc<Subpub<SubpubEvent>>,
        adapters: Arc<HashMap<String, Arc<dyn Adapter>>>,
        tools: Arc<ToolExecutor>,
    ) -> Arc<Self> {
        let registry = Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            shared: Shared {
                store,
                subpub,
                adapters,
                tools,
            },
            idle_eviction: Duration::from_secs(config.idle_eviction_minutes * 60),
        });
        registry.clone().spawn_sweeper(Duration::from_secs(config.sweep_interval_secs));
        registry
    }

    /// Single-flight: concurrent callers for the same ID never construct
    /// two managers for it. `hydrate` reads the store, so this may do I/O;
    /// callers already hold no other lock when invoking it.
    pub fn get_or_create(&self, id: Uuid) -> Result<Arc<ConversationManager>> {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.last_activity = Instant::now();
            return Ok(entry.manager.clone());
        }

        // Construct outside the lock (hydrate touches disk), then recheck —
        // if another caller won the race, discard ours and use theirs.
        let manager = Arc::new(ConversationManager::hydrate(
            id,
            self.shared.store.clone(),
            self.shared.subpub.clone(),
            self.shared.adapters.clone(),
            self.shared.tools.clone(),
        )?);

        let mut entries = self.entries.lock();
        let entry = entries.entry(id).or_insert_with(|| Entry {
            manager: manager.clone(),
            last_activity: Instant::now(),
        });
        entry.last_activity = Instant::now();
        Ok(entry.manager.clone())
    }

    /// Only usable when a manager has already been created this process;
    /// used by handlers that must 404 rather than silently hydrate
    /// (e.g. `GET /conversation/{id}` over a truly unknown ID still goes
    /// through `get_or_create`, which surfaces `UnknownConversation` from
    /// the store).
    pub fn get(&self, id: Uuid) -> Option<Arc<ConversationManager>> {
        self.entries.lock().get(&id).map(|e| e.manager.clone())
    }

    fn spawn_sweeper(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                self.sweep();
            }
        });
    }

    fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|id, entry| {
            let keep = entry.manager.is_working() || now.duration_since(entry.last_activity) < self.idle_eviction;
            if !keep {
                self.shared.subpub.close_conversation(*id);
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_domain::config::RegistryConfig;

    fn shared_parts() -> (
        Arc<TranscriptStore>,
        Arc<Subpub<SubpubEvent>>,
        Arc<HashMap<String, Arc<dyn Adapter>>>,
        Arc<ToolExecutor>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(TranscriptStore::new(dir.path()).unwrap());
        let subpub = Arc::new(Subpub::new());
        let adapters = Arc::new(HashMap::new());
        let tools = Arc::new(ToolExecutor::new(
            &ac_domain::config::ToolsConfig::default(),
            None,
        ));
        (store, subpub, adapters, tools, dir)
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_manager_instance() {
        let (store, subpub, adapters, tools, _dir) = shared_parts();
        let id = Uuid::new_v4();
        store.create_conversation(id, None, None).unwrap();

        let registry = ManagerRegistry::new(
            &RegistryConfig::default(),
            store,
            subpub,
            adapters,
            tools,
        );

        let a = registry.get_or_create(id).unwrap();
        let b = registry.get_or_create(id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn get_or_create_errors_for_an_unknown_conversation() {
        let (store, subpub, adapters, tools, _dir) = shared_parts();
        let registry = ManagerRegistry::new(
            &RegistryConfig::default(),
            store,
            subpub,
            adapters,
            tools,
        );
        let err = registry.get_or_create(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, Error::UnknownConversation(_)));
    }

    #[tokio::test]
    async fn sweep_evicts_idle_entries_past_the_threshold() {
        let (store, subpub, adapters, tools, _dir) = shared_parts();
        let id = Uuid::new_v4();
        store.create_conversation(id, None, None).unwrap();

        let registry = ManagerRegistry::new(
            &RegistryConfig {
                idle_eviction_minutes: 0,
                sweep_interval_secs: 60,
            },
            store,
            subpub,
            adapters,
            tools,
        );
        registry.get_or_create(id).unwrap();
        // idle_eviction_minutes: 0 means the duration is zero, so even a
        // freshly-created entry is immediately past threshold.
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.sweep();
        assert!(registry.get(id).is_none());
    }
}
