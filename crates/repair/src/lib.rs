//! Transcript repair: the deterministic pass applied to conversation
//! history before every provider call (§4.3 C3 Transcript Repairer).
//!
//! `repair` never mutates the store; it produces a new, adapter-ready
//! sequence from whatever the store currently holds. The store's own
//! invariants (I1) are the store's problem; this module restores I2–I5
//! on the fly, which may be transiently violated by a cancellation race.

use ac_domain::conversation::{MessageKind, StoredMessage};
use ac_domain::message::{ContentBlock, NeutralMessage, Role};
use std::collections::HashSet;

/// Apply the five repair steps, in order, to a conversation's message
/// history. Pure and deterministic: same input always yields the same
/// output, and `repair(repair(h)) == repair(h)`.
pub fn repair(history: &[StoredMessage]) -> Vec<StoredMessage> {
    let history = drop_excluded(history);
    let history = drop_orphan_tool_results(history);
    let history = heal_dangling_tool_uses(history);
    let history = dedupe_tool_results(history);
    normalize_empty_tool_use_input(history)
}

/// Step 1: drop messages flagged `excluded_from_context`.
fn drop_excluded(history: &[StoredMessage]) -> Vec<StoredMessage> {
    history
        .iter()
        .filter(|m| !m.excluded_from_context)
        .cloned()
        .collect()
}

/// Step 2: walk the sequence tracking `open_tool_uses` from the most
/// recent assistant message; drop any `tool_result` block whose
/// `tool_use_id` isn't open. Reset `open_tool_uses` after every user
/// message (a fresh assistant message is the only thing that can open
/// tool uses again).
fn drop_orphan_tool_results(history: Vec<StoredMessage>) -> Vec<StoredMessage> {
    let mut open_tool_uses: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(history.len());

    for mut msg in history {
        match msg.llm_payload.role {
            Role::Assistant => {
                for id in msg.tool_use_ids() {
                    open_tool_uses.insert(id);
                }
                out.push(msg);
            }
            Role::User => {
                let had_content = !msg.llm_payload.content.is_empty();
                let kept: Vec<ContentBlock> = msg
                    .llm_payload
                    .content
                    .into_iter()
                    .filter(|b| match b.tool_result_id() {
                        Some(id) => open_tool_uses.contains(id),
                        None => true,
                    })
                    .collect();
                open_tool_uses.clear();

                if kept.is_empty() && had_content {
                    // The message became empty once its only content was
                    // dropped orphan tool_results; omit the message.
                    continue;
                }
                msg.llm_payload.content = kept;
                out.push(msg);
            }
        }
    }

    out
}

/// Step 3: if the last assistant message has a `tool_use` with no later
/// matching `tool_result`, synthesize a user message with an
/// `is_error=true` cancellation result for each dangling ID, followed by
/// an assistant end-of-turn "[Operation cancelled]" message.
fn heal_dangling_tool_uses(history: Vec<StoredMessage>) -> Vec<StoredMessage> {
    let mut out = history;

    let Some(last_assistant_idx) = out
        .iter()
        .rposition(|m| m.llm_payload.role == Role::Assistant)
    else {
        return out;
    };

    let tool_use_ids = out[last_assistant_idx].tool_use_ids();
    if tool_use_ids.is_empty() {
        return out;
    }

    let mut resolved: HashSet<String> = HashSet::new();
    for msg in &out[last_assistant_idx + 1..] {
        if msg.llm_payload.role == Role::User {
            for id in msg.tool_result_ids() {
                resolved.insert(id);
            }
        }
    }

    let dangling: Vec<String> = tool_use_ids
        .into_iter()
        .filter(|id| !resolved.contains(id))
        .collect();
    if dangling.is_empty() {
        return out;
    }

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

    let template = &out[last_assistant_idx];
    out.push(synthetic_user_message(template, seal_content));
    out.push(synthetic_assistant_message(
        template,
        "[Operation cancelled]",
    ));

    out
}

/// Step 4: keep the first `tool_result` for a given `tool_use_id`, drop
/// any later duplicates (drop the message if it becomes empty).
fn dedupe_tool_results(history: Vec<StoredMessage>) -> Vec<StoredMessage> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(history.len());

    for mut msg in history {
        if msg.llm_payload.role != Role::User {
            out.push(msg);
            continue;
        }

        let had_content = !msg.llm_payload.content.is_empty();
        let kept: Vec<ContentBlock> = msg
            .llm_payload
            .content
            .into_iter()
            .filter(|b| match b.tool_result_id() {
                Some(id) => seen.insert(id.to_string()),
                None => true,
            })
            .collect();

        if kept.is_empty() && had_content {
            continue;
        }
        msg.llm_payload.content = kept;
        out.push(msg);
    }

    out
}

/// Step 5: every `tool_use` with empty accumulated input is rewritten to
/// an empty JSON object — the adapter and every provider expect an
/// object, never null or absent.
fn normalize_empty_tool_use_input(history: Vec<StoredMessage>) -> Vec<StoredMessage> {
    history
        .into_iter()
        .map(|mut msg| {
            for block in msg.llm_payload.content.iter_mut() {
                if let ContentBlock::ToolUse { input_json, .. } = block {
                    if input_json.is_null() {
                        *input_json = serde_json::json!({});
                    }
                }
            }
            msg
        })
        .collect()
}

fn synthetic_user_message(template: &StoredMessage, content: Vec<ContentBlock>) -> StoredMessage {
    StoredMessage {
        message_id: uuid::Uuid::new_v4(),
        conversation_id: template.conversation_id,
        sequence_id: template.sequence_id,
        kind: MessageKind::Tool,
        llm_payload: NeutralMessage::user(content),
        usage: Default::default(),
        display_payload: None,
        excluded_from_context: false,
        created_at: chrono::Utc::now(),
    }
}

fn synthetic_assistant_message(template: &StoredMessage, text: &str) -> StoredMessage {
    StoredMessage {
        message_id: uuid::Uuid::new_v4(),
        conversation_id: template.conversation_id,
        sequence_id: template.sequence_id,
        kind: MessageKind::System,
        llm_payload: NeutralMessage::assistant_text(text, true),
        usage: Default::default(),
        display_payload: None,
        excluded_from_context: false,
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_domain::message::Usage;
    use uuid::Uuid;

    fn msg(conv: Uuid, seq: u64, kind: MessageKind, payload: NeutralMessage) -> StoredMessage {
        StoredMessage {
            message_id: Uuid::new_v4(),
            conversation_id: conv,
            sequence_id: seq,
            kind,
            llm_payload: payload,
            usage: Usage::default(),
            display_payload: None,
            excluded_from_context: false,
            created_at: chrono::Utc::now(),
        }
    }

    fn user_text(conv: Uuid, seq: u64, text: &str) -> StoredMessage {
        msg(
            conv,
            seq,
            MessageKind::User,
            NeutralMessage::user(vec![ContentBlock::text(text)]),
        )
    }

    fn assistant_tool_use(conv: Uuid, seq: u64, id: &str) -> StoredMessage {
        msg(
            conv,
            seq,
            MessageKind::Agent,
            NeutralMessage::assistant(
                vec![ContentBlock::tool_use(id, "bash", serde_json::json!({"cmd": "ls"}))],
                false,
            ),
        )
    }

    fn user_tool_result(conv: Uuid, seq: u64, id: &str) -> StoredMessage {
        let now = chrono::Utc::now();
        msg(
            conv,
            seq,
            MessageKind::Tool,
            NeutralMessage::user(vec![ContentBlock::tool_result(id, false, "ok", now, now)]),
        )
    }

    // ── excluded_from_context ────────────────────────────────────────

    #[test]
    fn drops_excluded_messages() {
        let conv = Uuid::new_v4();
        let mut excluded = user_text(conv, 1, "secret");
        excluded.excluded_from_context = true;
        let kept = user_text(conv, 2, "hello");
        let out = repair(&[excluded, kept]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].llm_payload.text_joined(), "hello");
    }

    // ── orphan tool results ──────────────────────────────────────────

    #[test]
    fn drops_orphan_tool_result_not_opened_by_assistant() {
        let conv = Uuid::new_v4();
        let history = vec![
            user_text(conv, 1, "hi"),
            user_tool_result(conv, 2, "does-not-exist"),
        ];
        let out = repair(&history);
        // The orphan result message becomes empty and is dropped entirely.
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn keeps_tool_result_matching_open_tool_use() {
        let conv = Uuid::new_v4();
        let history = vec![
            user_text(conv, 1, "hi"),
            assistant_tool_use(conv, 2, "call-1"),
            user_tool_result(conv, 3, "call-1"),
        ];
        let out = repair(&history);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn resets_open_tool_uses_after_user_message() {
        let conv = Uuid::new_v4();
        let history = vec![
            assistant_tool_use(conv, 1, "call-1"),
            user_text(conv, 2, "an intervening message, not a tool result"),
            // This references call-1 but a user message has intervened,
            // so it is orphaned and dropped.
            user_tool_result(conv, 3, "call-1"),
        ];
        let out = repair(&history);
        assert_eq!(out.len(), 2);
    }

    // ── dangling tool-uses (P5-adjacent: seal shape) ─────────────────

    #[test]
    fn heals_dangling_tool_use_in_last_assistant_message() {
        let conv = Uuid::new_v4();
        let history = vec![
            user_text(conv, 1, "run ls"),
            assistant_tool_use(conv, 2, "call-1"),
        ];
        let out = repair(&history);
        assert_eq!(out.len(), 4);
        let seal = &out[2];
        assert_eq!(seal.llm_payload.role, Role::User);
        let result = seal.llm_payload.content.first().unwrap();
        assert!(matches!(result, ContentBlock::ToolResult { is_error: true, .. }));
        let closing = &out[3];
        assert_eq!(closing.llm_payload.role, Role::Assistant);
        assert!(closing.llm_payload.end_of_turn);
        assert_eq!(closing.llm_payload.text_joined(), "[Operation cancelled]");
    }

    #[test]
    fn does_not_heal_when_last_assistant_message_fully_resolved() {
        let conv = Uuid::new_v4();
        let history = vec![
            user_text(conv, 1, "run ls"),
            assistant_tool_use(conv, 2, "call-1"),
            user_tool_result(conv, 3, "call-1"),
        ];
        let out = repair(&history);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn does_not_heal_when_no_tool_use_present() {
        let conv = Uuid::new_v4();
        let history = vec![
            user_text(conv, 1, "hi"),
            msg(
                conv,
                2,
                MessageKind::Agent,
                NeutralMessage::assistant_text("hello!", true),
            ),
        ];
        let out = repair(&history);
        assert_eq!(out.len(), 2);
    }

    // ── duplicate tool-results ───────────────────────────────────────

    #[test]
    fn keeps_first_duplicate_tool_result_drops_rest() {
        let conv = Uuid::new_v4();
        let history = vec![
            user_text(conv, 1, "hi"),
            assistant_tool_use(conv, 2, "call-1"),
            user_tool_result(conv, 3, "call-1"),
            user_tool_result(conv, 4, "call-1"),
        ];
        let out = repair(&history);
        // second duplicate's message becomes empty and is dropped
        assert_eq!(out.len(), 3);
    }

    // ── empty tool-use input normalization ───────────────────────────

    #[test]
    fn normalizes_null_tool_use_input_to_empty_object() {
        let conv = Uuid::new_v4();
        let bad = msg(
            conv,
            1,
            MessageKind::Agent,
            NeutralMessage::assistant(
                vec![ContentBlock::tool_use("call-1", "bash", serde_json::Value::Null)],
                false,
            ),
        );
        let out = repair(&[bad]);
        let block = &out[0].llm_payload.content[0];
        match block {
            ContentBlock::ToolUse { input_json, .. } => {
                assert_eq!(*input_json, serde_json::json!({}));
            }
            _ => panic!("expected tool_use"),
        }
    }

    // ── idempotence (P2) and soundness (P3) ──────────────────────────

    #[test]
    fn repair_is_idempotent() {
        let conv = Uuid::new_v4();
        let history = vec![
            user_text(conv, 1, "run ls"),
            assistant_tool_use(conv, 2, "call-1"),
            user_tool_result(conv, 3, "call-1"),
            user_tool_result(conv, 4, "call-1"),
        ];
        let once = repair(&history);
        let twice = repair(&once);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(
                serde_json::to_value(&a.llm_payload).unwrap(),
                serde_json::to_value(&b.llm_payload).unwrap()
            );
        }
    }

    #[test]
    fn repaired_history_has_no_duplicate_tool_results() {
        let conv = Uuid::new_v4();
        let history = vec![
            assistant_tool_use(conv, 1, "call-1"),
            user_tool_result(conv, 2, "call-1"),
            user_tool_result(conv, 3, "call-1"),
        ];
        let out = repair(&history);
        let mut seen = HashSet::new();
        for m in &out {
            for id in m.tool_result_ids() {
                assert!(seen.insert(id), "duplicate tool_result survived repair");
            }
        }
    }
}
