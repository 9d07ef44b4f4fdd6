use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability (structured logging)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls the `tracing-subscriber` setup at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// The `service.name` field attached to every log line.
    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Emit logs as JSON lines instead of the pretty human formatter.
    /// Defaults to `false` for local development; operators typically
    /// flip this on in production where a log collector parses JSON.
    #[serde(default)]
    pub json: bool,

    /// Default `tracing` filter directive (overridden by `RUST_LOG` if set).
    #[serde(default = "d_filter")]
    pub filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: d_service_name(),
            json: false,
            filter: d_filter(),
        }
    }
}

fn d_service_name() -> String {
    "agentcore".into()
}

fn d_filter() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_service_name_is_agentcore() {
        let cfg = ObservabilityConfig::default();
        assert_eq!(cfg.service_name, "agentcore");
    }

    #[test]
    fn default_is_not_json() {
        assert!(!ObservabilityConfig::default().json);
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: ObservabilityConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.filter, "info");
    }
}
