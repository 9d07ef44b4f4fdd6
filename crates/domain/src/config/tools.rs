use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools (exec / file ops)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the built-in tool catalog (C4's registered tools).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Root directory file-ops tools are scoped to; absolute paths and
    /// `..` traversal outside it are rejected.
    #[serde(default = "d_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub exec_security: ExecSecurityConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_root: d_workspace_root(),
            exec: ExecConfig::default(),
            exec_security: ExecSecurityConfig::default(),
        }
    }
}

/// Exec (shell) tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Hard timeout for a single invocation (seconds).
    #[serde(default = "d_300")]
    pub timeout_sec: u64,
    /// Max output chars kept; output beyond this is truncated from the middle.
    #[serde(default = "d_200000")]
    pub max_output_chars: usize,
    /// How long a finished background session's output is kept before the
    /// manager's stale-cleanup sweep drops it (milliseconds).
    #[serde(default = "d_cleanup_ms")]
    pub cleanup_ms: u64,
    /// How long a foreground exec waits before auto-backgrounding
    /// (milliseconds). 0 means wait for the configured hard timeout.
    #[serde(default = "d_background_ms")]
    pub background_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_sec: 300,
            max_output_chars: 200_000,
            background_ms: d_background_ms(),
            cleanup_ms: d_cleanup_ms(),
        }
    }
}

fn d_cleanup_ms() -> u64 {
    15 * 60 * 1000
}
fn d_background_ms() -> u64 {
    8_000
}

/// Security configuration for the exec tool — audit logging and command denylist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSecurityConfig {
    #[serde(default = "d_true")]
    pub audit_log: bool,
    /// Regex patterns that are denied. Commands matching any pattern are rejected.
    #[serde(default = "d_denied_patterns")]
    pub denied_patterns: Vec<String>,
}

impl Default for ExecSecurityConfig {
    fn default() -> Self {
        Self {
            audit_log: true,
            denied_patterns: d_denied_patterns(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_workspace_root() -> PathBuf {
    PathBuf::from("./workspace")
}
fn d_300() -> u64 {
    300
}
fn d_200000() -> usize {
    200_000
}
fn d_true() -> bool {
    true
}
fn d_denied_patterns() -> Vec<String> {
    vec![
        r"rm\s+-rf\s+/".into(),
        r"mkfs\.".into(),
        r"dd\s+if=.+of=/dev/".into(),
    ]
}
