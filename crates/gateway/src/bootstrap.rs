//! [`AppState`] construction extracted from `main.rs`, following the
//! teacher's split between "wire up every subsystem" and "start serving
//! HTTP traffic."

use std::collections::HashMap;
use std::sync::Arc;

use ac_domain::config::{Config, ConfigSeverity};
use ac_providers::adapters_from_config;
use ac_store::{Subpub, TranscriptStore};
use ac_tools::ToolExecutor;
use anyhow::Context;

use crate::runtime::registry::ManagerRegistry;
use crate::runtime::subagent::RegistrySpawner;
use crate::state::AppState;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`]. The registry's idle-eviction sweeper is already running
/// by the time this returns.
pub async fn build_app_state(config: Arc<Config>, state_dir: std::path::PathBuf) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── Transcript store ─────────────────────────────────────────────
    let store = Arc::new(TranscriptStore::new(&state_dir).context("initializing transcript store")?);
    tracing::info!(path = %state_dir.display(), "transcript store ready");

    // ── Subpub ────────────────────────────────────────────────────────
    let subpub = Arc::new(Subpub::new());
    tracing::info!("subpub ready");

    // ── LLM providers ────────────────────────────────────────────────
    let adapters: HashMap<_, _> = adapters_from_config(&config.llm).context("initializing LLM providers")?;
    if adapters.is_empty() {
        tracing::warn!("no LLM providers configured — conversation turns will fail at request time");
    } else {
        tracing::info!(providers = adapters.len(), "LLM provider adapters ready");
    }
    let adapters = Arc::new(adapters);

    // ── Sub-agent spawner (bound to the registry below once it exists) ──
    let default_model = config.llm.providers.first().map(|p| p.id.clone());
    let spawner = Arc::new(RegistrySpawner::new(store.clone(), default_model));

    // ── Tool executor ────────────────────────────────────────────────
    let tools = Arc::new(ToolExecutor::new(&config.tools, Some(spawner.clone())));
    tracing::info!(workspace_root = %config.tools.workspace_root.display(), "tool executor ready");

    // ── Manager registry (spawns the idle-eviction sweeper) ─────────
    let registry = ManagerRegistry::new(
        &config.registry,
        store.clone(),
        subpub.clone(),
        adapters.clone(),
        tools.clone(),
    );
    spawner.bind_registry(registry.clone());
    tracing::info!(
        idle_eviction_minutes = config.registry.idle_eviction_minutes,
        "manager registry ready"
    );

    Ok(AppState {
        config,
        adapters,
        store,
        subpub,
        tools,
        registry,
    })
}
