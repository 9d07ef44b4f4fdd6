use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager Registry (C7)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Managers idle beyond this many minutes are evicted by the sweeper.
    #[serde(default = "d_idle_minutes")]
    pub idle_eviction_minutes: u64,
    /// How often the background sweeper scans for idle managers (seconds).
    #[serde(default = "d_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_eviction_minutes: d_idle_minutes(),
            sweep_interval_secs: d_sweep_interval(),
        }
    }
}

fn d_idle_minutes() -> u64 {
    30
}

fn d_sweep_interval() -> u64 {
    60
}
