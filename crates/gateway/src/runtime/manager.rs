//! C6 Conversation Manager (§4.6): the per-conversation state machine that
//! drives the agent loop, owns cancellation, enforces "one active turn per
//! conversation," and writes every message durably before it is published.

use std::collections::HashMap;
use std::sync::Arc;

use ac_domain::conversation::MessageKind;
use ac_domain::error::{Error, Result};
use ac_domain::message::{ContentBlock, NeutralMessage, Usage};
use ac_domain::trace::TraceEvent;
use ac_providers::{Adapter, NeutralRequest, RequestContext, ToolChoice};
use ac_store::{Subpub, TranscriptStore};
use ac_tools::ToolExecutor;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::runtime::cancel::CancelToken;
use crate::runtime::catalog::builtin_tools;
use crate::runtime::SubpubEvent;
use crate::state::split_model_id;

/// Default per-turn output cap; re-capped by the adapter against the
/// provider/model limit (§4.2).
const MAX_OUTPUT_TOKENS: u32 = 8_192;

const SYSTEM_INSTRUCTION: &str = "You are an autonomous coding and research agent. \
Use the available tools to accomplish the user's request. When you are done, \
reply with your final answer and stop calling tools.";

/// Visible process state of a conversation's agent loop (§4.6 States).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Working,
    Cancelling,
}

struct Inner {
    phase: Phase,
    bound_model: Option<String>,
    cancel: CancelToken,
    loop_handle: Option<JoinHandle<()>>,
}

/// Per-conversation manager. Cheap to clone (holds only `Arc`s); the
/// [`crate::runtime::registry::ManagerRegistry`] is the only thing that
/// constructs one, keeping exactly one instance alive per conversation.
pub struct ConversationManager {
    id: Uuid,
    store: Arc<TranscriptStore>,
    subpub: Arc<Subpub<SubpubEvent>>,
    adapters: Arc<HashMap<String, Arc<dyn Adapter>>>,
    tools: Arc<ToolExecutor>,
    inner: Mutex<Inner>,
}

impl ConversationManager {
    /// Construct and hydrate: load the conversation row and its bound
    /// model from the store. No side effects beyond memory; state is
    /// always `Idle` after this, even if the store holds a dangling
    /// tool-use from a crashed prior turn — that is healed by the
    /// Repairer the next time a turn actually runs (§4.6 hydrate).
    pub fn hydrate(
        id: Uuid,
        store: Arc<TranscriptStore>,
        subpub: Arc<Subpub<SubpubEvent>>,
        adapters: Arc<HashMap<String, Arc<dyn Adapter>>>,
        tools: Arc<ToolExecutor>,
    ) -> Result<Self> {
        let conversation = store.get_conversation(id)?;
        Ok(Self {
            id,
            store,
            subpub,
            adapters,
            tools,
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                bound_model: conversation.bound_model,
                cancel: CancelToken::new(),
                loop_handle: None,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Read-only, cheap, safe from any task (§4.6).
    pub fn is_working(&self) -> bool {
        self.inner.lock().phase != Phase::Idle
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn get_model(&self) -> Option<String> {
        self.inner.lock().bound_model.clone()
    }

    /// `accept_user_message` (§4.6). Returns whether this was the very
    /// first user message of the conversation.
    pub fn accept_user_message(
        self: &Arc<Self>,
        model_id: &str,
        text: String,
    ) -> Result<bool> {
        {
            let inner = self.inner.lock();
            if let Some(bound) = &inner.bound_model {
                if bound != model_id {
                    return Err(Error::ConversationModelMismatch {
                        bound: bound.clone(),
                        requested: model_id.to_owned(),
                    });
                }
            }
        }

        let is_first_message = self.store.list(self.id)?.is_empty();

        if self.inner.lock().bound_model.is_none() {
            self.store.bind_model(self.id, model_id)?;
            self.inner.lock().bound_model = Some(model_id.to_owned());
        }

        let message = self.store.append(
            self.id,
            MessageKind::User,
            NeutralMessage::user(vec![ContentBlock::text(text)]),
            Usage::default(),
            None,
        )?;
        self.publish_message(&message);

        let mut inner = self.inner.lock();
        match inner.phase {
            // A turn is already running; it will pick this message up the
            // next time it re-reads history, before its next adapter call
            // (the chosen policy for the open question in §9).
            Phase::Working | Phase::Cancelling => {}
            Phase::Idle => {
                inner.phase = Phase::Working;
                inner.cancel = CancelToken::new();
                let cancel = inner.cancel.clone();
                let manager = self.clone();
                inner.loop_handle = Some(tokio::spawn(async move {
                    manager.run_loop(cancel).await;
                }));
                self.broadcast_working_state(true);
            }
        }

        Ok(is_first_message)
    }

    /// `cancel` (§4.6). No-op on `Idle`. Otherwise signals the loop's
    /// cancel token and waits for it to exit — the loop itself performs
    /// the seal step and transitions back to `Idle` before this returns.
    pub async fn cancel(&self) -> Result<()> {
        let (cancel, handle) = {
            let mut inner = self.inner.lock();
            if inner.phase == Phase::Idle {
                return Ok(());
            }
            inner.phase = Phase::Cancelling;
            (inner.cancel.clone(), inner.loop_handle.take())
        };
        cancel.cancel();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    fn publish_message(&self, message: &ac_domain::conversation::StoredMessage) {
        self.subpub
            .publish(self.id, message.sequence_id, SubpubEvent::Message(message.clone()));
    }

    fn broadcast_working_state(&self, working: bool) {
        let model = self.inner.lock().bound_model.clone();
        self.subpub
            .broadcast(self.id, SubpubEvent::WorkingStateChange { working, model });
    }

    /// The agent loop (§4.6 "Agent loop (state = Working)"). Repeats
    /// provider-call → optional tool dispatch → append cycles until a
    /// turn ends. If the turn ended because of `cancel()`, runs the seal
    /// step — sealing any dangling tool_uses and always closing the turn
    /// with an end-of-turn "[Operation cancelled]" message — before
    /// returning to `Idle`.
    async fn run_loop(self: Arc<Self>, cancel: CancelToken) {
        loop {
            match self.run_one_turn(&cancel).await {
                TurnOutcome::Continue => continue,
                TurnOutcome::Done => break,
            }
        }

        if cancel.is_cancelled() {
            if let Err(e) = self.seal_cancelled_turn() {
                tracing::warn!(conversation_id = %self.id, error = %e, "seal step failed");
            }
        }

        let mut inner = self.inner.lock();
        inner.phase = Phase::Idle;
        inner.loop_handle = None;
        drop(inner);
        self.broadcast_working_state(false);

        TraceEvent::ManagerStateChange {
            conversation_id: self.id.to_string(),
            from: "working".into(),
            to: "idle".into(),
        }
        .emit();
    }

    async fn run_one_turn(&self, cancel: &CancelToken) -> TurnOutcome {
        if cancel.is_cancelled() {
            return TurnOutcome::Done;
        }

        let model_id = match self.get_model() {
            Some(m) => m,
            None => {
                self.append_error("no model bound to this conversation".into());
                return TurnOutcome::Done;
            }
        };

        let history = match self.store.list(self.id) {
            Ok(h) => h,
            Err(e) => {
                self.append_error(format!("store failure: {e}"));
                return TurnOutcome::Done;
            }
        };
        let repaired = ac_repair::repair(&history);

        let (provider_id, model_name) = split_model_id(&model_id);
        let Some(adapter) = self.adapters.get(provider_id).cloned() else {
            self.append_error(format!("unknown provider for model {model_id}"));
            return TurnOutcome::Done;
        };

        let request = NeutralRequest {
            model: model_name.to_owned(),
            system: vec![ContentBlock::text(SYSTEM_INSTRUCTION)],
            tools: builtin_tools(),
            tool_choice: ToolChoice::Auto,
            messages: repaired.into_iter().map(|m| m.llm_payload).collect(),
            max_output_tokens: MAX_OUTPUT_TOKENS,
            thinking_budget: None,
            stop_sequences: Vec::new(),
        };

        if cancel.is_cancelled() {
            return TurnOutcome::Done;
        }

        let ctx = RequestContext::new(cancel.as_tokio());
        let response = match adapter.do_request(&ctx, request).await {
            Ok(r) => r,
            Err(_e) if cancel.is_cancelled() => return TurnOutcome::Done,
            Err(e) => {
                self.append_fatal_upstream(e.to_string());
                return TurnOutcome::Done;
            }
        };

        let assistant_message = match self.store.append(
            self.id,
            MessageKind::Agent,
            response.message.clone(),
            response.usage,
            None,
        ) {
            Ok(m) => m,
            Err(e) => {
                self.append_error(format!("store failure: {e}"));
                return TurnOutcome::Done;
            }
        };
        self.publish_message(&assistant_message);

        if !response.message.has_tool_uses() || response.message.end_of_turn {
            return TurnOutcome::Done;
        }

        if cancel.is_cancelled() {
            return TurnOutcome::Done;
        }

        let tool_uses: Vec<ContentBlock> = response.message.tool_uses().cloned().collect();
        let mut results = Vec::with_capacity(tool_uses.len());
        for tool_use in &tool_uses {
            let conversation = match self.store.get_conversation(self.id) {
                Ok(c) => c,
                Err(e) => {
                    self.append_error(format!("store failure: {e}"));
                    return TurnOutcome::Done;
                }
            };
            let result = self
                .tools
                .execute(
                    tool_use,
                    self.id,
                    conversation.cwd_hint.as_deref(),
                    cancel.as_tokio(),
                )
                .await;
            let tool_name = match tool_use {
                ContentBlock::ToolUse { tool_name, .. } => tool_name.clone(),
                _ => String::new(),
            };
            let is_error = matches!(&result, ContentBlock::ToolResult { is_error, .. } if *is_error);
            TraceEvent::ToolExecuted {
                tool_name,
                call_id: tool_use.tool_use_id().unwrap_or_default().to_owned(),
                is_error,
                duration_ms: 0,
            }
            .emit();
            results.push(result);
        }

        let tool_message = match self.store.append(
            self.id,
            MessageKind::Tool,
            NeutralMessage::user(results),
            Usage::default(),
            None,
        ) {
            Ok(m) => m,
            Err(e) => {
                self.append_error(format!("store failure: {e}"));
                return TurnOutcome::Done;
            }
        };
        self.publish_message(&tool_message);

        TurnOutcome::Continue
    }

    /// Seal step (§4.6 cancel, §4.3 dangling tool-uses). Invoked only when
    /// the loop exited because `cancel()` was signalled. Seals any
    /// dangling tool_uses on the last assistant message first — skipped
    /// when the tool actually finished and its result was already
    /// recorded before the cancellation landed (I5 forbids a duplicate
    /// tool_result) — then *always* appends the end-of-turn
    /// "[Operation cancelled]" message, independent of whether anything
    /// was dangling (§5: the seal step always ends the turn).
    fn seal_cancelled_turn(&self) -> Result<()> {
        let history = self.store.list(self.id)?;
        let last_assistant = history
            .iter()
            .rev()
            .find(|m| matches!(m.kind, MessageKind::Agent));

        if let Some(last_assistant) = last_assistant {
            let last_assistant_seq = last_assistant.sequence_id;
            let tool_use_ids = last_assistant.tool_use_ids();
            if !tool_use_ids.is_empty() {
                let resolved: std::collections::HashSet<String> = history
                    .iter()
                    .filter(|m| m.sequence_id > last_assistant_seq)
                    .flat_map(|m| m.tool_result_ids())
                    .collect();

                let dangling: Vec<String> = tool_use_ids
                    .into_iter()
                    .filter(|id| !resolved.contains(id))
                    .collect();

                if !dangling.is_empty() {
                    TraceEvent::SealStep {
                        conversation_id: self.id.to_string(),
                        unresolved_tool_uses: dangling.len(),
                    }
                    .emit();

                    let now = chrono::Utc::now();
                    let seal_content: Vec<ContentBlock> = dangling
                        .iter()
                        .map(|id| {
                            ContentBlock::tool_result(
                                id.clone(),
                                true,
                                "Tool execution cancelled by user",
                                now,
                                now,
                            )
                        })
                        .collect();

                    let seal_message = self.store.append(
                        self.id,
                        MessageKind::Tool,
                        NeutralMessage::user(seal_content),
                        Usage::default(),
                        None,
                    )?;
                    self.publish_message(&seal_message);
                }
            }
        }

        let closing = self.store.append(
            self.id,
            MessageKind::System,
            NeutralMessage::assistant_text("[Operation cancelled]", true),
            Usage::default(),
            None,
        )?;
        self.publish_message(&closing);

        Ok(())
    }

    fn append_fatal_upstream(&self, message: String) {
        self.append_message_with_error(message, ac_domain::message::ErrorKind::FatalUpstream);
    }

    fn append_error(&self, message: String) {
        self.append_message_with_error(message, ac_domain::message::ErrorKind::StoreFailure);
    }

    fn append_message_with_error(&self, message: String, kind: ac_domain::message::ErrorKind) {
        let mut payload = NeutralMessage::assistant_text(message, true);
        payload.error_kind = Some(kind);
        match self.store.append(
            self.id,
            MessageKind::Error,
            payload,
            Usage::default(),
            None,
        ) {
            Ok(stored) => self.publish_message(&stored),
            Err(e) => tracing::error!(conversation_id = %self.id, error = %e, "failed to record error message"),
        }
    }
}

enum TurnOutcome {
    Continue,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_providers::{NeutralResponse};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct StubAdapter {
        responses: Mutex<Vec<NeutralMessage>>,
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        async fn do_request(
            &self,
            _ctx: &RequestContext,
            _request: NeutralRequest,
        ) -> Result<ac_providers::NeutralResponse> {
            let message = self.responses.lock().remove(0);
            let now = chrono::Utc::now();
            Ok(NeutralResponse {
                message,
                usage: Usage::default(),
                model: "stub".into(),
                stop_reason: Some("end_turn".into()),
                start_time: now,
                end_time: now,
            })
        }

        fn provider_id(&self) -> &str {
            "stub"
        }

        fn capabilities(&self) -> &ac_domain::capability::ProviderCapabilities {
            static CAPS: std::sync::OnceLock<ac_domain::capability::ProviderCapabilities> =
                std::sync::OnceLock::new();
            CAPS.get_or_init(ac_domain::capability::ProviderCapabilities::default)
        }
    }

    fn harness(responses: Vec<NeutralMessage>) -> (TempDir, Arc<ConversationManager>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TranscriptStore::new(dir.path()).unwrap());
        let subpub = Arc::new(Subpub::new());
        let id = Uuid::new_v4();
        store.create_conversation(id, None, None).unwrap();

        let mut adapters: HashMap<String, Arc<dyn Adapter>> = HashMap::new();
        adapters.insert(
            "stub".into(),
            Arc::new(StubAdapter {
                responses: Mutex::new(responses),
            }),
        );

        let tools = Arc::new(ToolExecutor::new(&ac_domain::config::ToolsConfig::default(), None));
        let manager = Arc::new(
            ConversationManager::hydrate(id, store, subpub, Arc::new(adapters), tools).unwrap(),
        );
        (dir, manager)
    }

    #[tokio::test]
    async fn happy_path_ends_with_two_messages_and_idle() {
        let (_dir, manager) = harness(vec![NeutralMessage::assistant_text("hello!", true)]);

        let first = manager
            .accept_user_message("stub", "hi".into())
            .unwrap();
        assert!(first);

        // Give the spawned loop a chance to run to completion.
        for _ in 0..50 {
            if !manager.is_working() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(!manager.is_working());
        let history = manager.store.list(manager.id()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].llm_payload.text_joined(), "hello!");
    }

    #[tokio::test]
    async fn model_mismatch_is_rejected() {
        let (_dir, manager) = harness(vec![NeutralMessage::assistant_text("hi", true)]);
        manager.accept_user_message("stub", "hi".into()).unwrap();
        for _ in 0..50 {
            if !manager.is_working() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let err = manager
            .accept_user_message("different-provider", "hi again".into())
            .unwrap_err();
        assert!(matches!(err, Error::ConversationModelMismatch { .. }));
    }

    #[tokio::test]
    async fn cancel_on_idle_is_a_no_op() {
        let (_dir, manager) = harness(vec![]);
        manager.cancel().await.unwrap();
        assert!(!manager.is_working());
    }

    #[tokio::test]
    async fn tool_round_trip_appends_four_messages() {
        let (_dir, manager) = harness(vec![
            NeutralMessage::assistant(
                vec![
                    ContentBlock::text("running it"),
                    ContentBlock::tool_use("call-1", "bash", serde_json::json!({"command": "echo hi"})),
                ],
                false,
            ),
            NeutralMessage::assistant_text("done", true),
        ]);

        manager.accept_user_message("stub", "run: echo hi".into()).unwrap();
        for _ in 0..100 {
            if !manager.is_working() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let history = manager.store.list(manager.id()).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].kind, MessageKind::Tool);
        let repaired = ac_repair::repair(&history);
        let tool_result_count: usize = repaired
            .iter()
            .flat_map(|m| m.tool_result_ids())
            .filter(|id| id == "call-1")
            .count();
        assert_eq!(tool_result_count, 1);
    }

    #[tokio::test]
    async fn cancel_during_tool_execution_still_closes_the_turn() {
        // Scenario 3 (§8): the tool's own cancellation races the manager's
        // cancel token and wins, so by the time the loop next checks
        // `cancel.is_cancelled()` the tool_use is already resolved — the
        // seal step must still append the closing message regardless.
        let (_dir, manager) = harness(vec![
            NeutralMessage::assistant(
                vec![ContentBlock::tool_use(
                    "call-1",
                    "bash",
                    serde_json::json!({"command": "sleep 2"}),
                )],
                false,
            ),
            NeutralMessage::assistant_text("done", true),
        ]);

        manager
            .accept_user_message("stub", "run: sleep 2".into())
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        manager.cancel().await.unwrap();

        assert!(!manager.is_working());
        let history = manager.store.list(manager.id()).unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.kind, MessageKind::System);
        assert!(last.llm_payload.end_of_turn);
        assert_eq!(last.llm_payload.text_joined(), "[Operation cancelled]");

        let tool_result = history
            .iter()
            .flat_map(|m| m.tool_result_ids())
            .filter(|id| id == "call-1")
            .count();
        assert_eq!(tool_result, 1, "cancelled tool_use must be resolved exactly once");
    }
}
