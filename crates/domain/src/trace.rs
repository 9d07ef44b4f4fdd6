use serde::Serialize;

/// Structured trace events emitted across all agentcore crates. Each
/// variant is logged as a single `tracing::info!` with the event's JSON
/// as a field, rather than as an interpolated string — keeps log lines
/// greppable and machine-parseable without a separate metrics pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TranscriptAppend {
        conversation_id: String,
        sequence_id: u64,
        kind: String,
    },
    ManagerStateChange {
        conversation_id: String,
        from: String,
        to: String,
    },
    ProviderRequest {
        provider: String,
        model: String,
        streaming: bool,
        attempt: u32,
        duration_ms: u64,
    },
    ProviderRetry {
        provider: String,
        attempt: u32,
        backoff_ms: u64,
        reason: String,
    },
    ToolExecuted {
        tool_name: String,
        call_id: String,
        is_error: bool,
        duration_ms: u64,
    },
    SealStep {
        conversation_id: String,
        unresolved_tool_uses: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "agentcore_event");
    }
}
