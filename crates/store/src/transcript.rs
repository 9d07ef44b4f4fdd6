//! C1 Transcript Store — durable, ordered, per-conversation message log
//! (§4.1).
//!
//! Persistence follows the teacher's JSON-file-backed session store: a
//! conversation's row lives at `<state_dir>/conversations/<id>.json`, its
//! message log at `<state_dir>/conversations/<id>.jsonl` (one `StoredMessage`
//! per line, append-only — the file itself mirrors the durability guarantee
//! the spec asks for). Appends are serialized per conversation by holding
//! that conversation's `Mutex` for the duration of the write; this is what
//! makes `append` "atomically assigns the next sequence ID" true even
//! under concurrent callers.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ac_domain::conversation::{Conversation, MessageKind, StoredMessage};
use ac_domain::error::{Error, Result};
use ac_domain::message::{NeutralMessage, Usage};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

struct ConversationLog {
    conversation: Conversation,
    messages: Vec<StoredMessage>,
    row_path: PathBuf,
    log_path: PathBuf,
}

impl ConversationLog {
    fn persist_row(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.conversation)?;
        fs::write(&self.row_path, json).map_err(Error::Io)
    }

    fn append_line(&self, message: &StoredMessage) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(Error::Io)?;
        file.write_all(&line).map_err(Error::Io)?;
        file.sync_data().map_err(Error::Io)
    }
}

/// Durable, append-only transcript store. One instance serves every
/// conversation in the process; each conversation's mutations are
/// serialized by its own `Mutex` so unrelated conversations never block
/// each other.
pub struct TranscriptStore {
    state_dir: PathBuf,
    conversations: RwLock<HashMap<Uuid, Arc<Mutex<ConversationLog>>>>,
}

impl TranscriptStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into().join("conversations");
        fs::create_dir_all(&state_dir).map_err(Error::Io)?;
        Ok(Self {
            state_dir,
            conversations: RwLock::new(HashMap::new()),
        })
    }

    fn row_path(&self, id: Uuid) -> PathBuf {
        self.state_dir.join(format!("{id}.json"))
    }

    fn log_path(&self, id: Uuid) -> PathBuf {
        self.state_dir.join(format!("{id}.jsonl"))
    }

    /// Create a brand new conversation row. Errors if one already exists.
    pub fn create_conversation(
        &self,
        id: Uuid,
        cwd_hint: Option<String>,
        parent_conversation_id: Option<Uuid>,
    ) -> Result<Conversation> {
        let mut conversations = self.conversations.write();
        if conversations.contains_key(&id) || self.row_path(id).exists() {
            return Err(Error::Other(format!("conversation {id} already exists")));
        }
        let conversation = Conversation::new(id, cwd_hint, parent_conversation_id);
        let log = ConversationLog {
            conversation: conversation.clone(),
            messages: Vec::new(),
            row_path: self.row_path(id),
            log_path: self.log_path(id),
        };
        log.persist_row()?;
        conversations.insert(id, Arc::new(Mutex::new(log)));
        Ok(conversation)
    }

    /// Load (from the in-memory cache, or from disk on a cold start) the
    /// conversation log handle, without creating anything new.
    fn get_or_load(&self, id: Uuid) -> Result<Arc<Mutex<ConversationLog>>> {
        if let Some(log) = self.conversations.read().get(&id) {
            return Ok(log.clone());
        }

        let row_path = self.row_path(id);
        if !row_path.exists() {
            return Err(Error::UnknownConversation(id.to_string()));
        }

        let mut conversations = self.conversations.write();
        // Another thread may have loaded it while we waited for the write lock.
        if let Some(log) = conversations.get(&id) {
            return Ok(log.clone());
        }

        let row_bytes = fs::read(&row_path).map_err(Error::Io)?;
        let conversation: Conversation = serde_json::from_slice(&row_bytes)?;

        let log_path = self.log_path(id);
        let messages = if log_path.exists() {
            read_jsonl(&log_path)?
        } else {
            Vec::new()
        };

        let log = Arc::new(Mutex::new(ConversationLog {
            conversation,
            messages,
            row_path,
            log_path,
        }));
        conversations.insert(id, log.clone());
        Ok(log)
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Conversation> {
        let log = self.get_or_load(id)?;
        Ok(log.lock().conversation.clone())
    }

    /// Set the bound model on first use. No-op (but not an error) if a
    /// model is already bound to the same value; the manager is
    /// responsible for rejecting a mismatched rebind (I4.2 in §4.6).
    pub fn bind_model(&self, id: Uuid, model: &str) -> Result<()> {
        let log = self.get_or_load(id)?;
        let mut log = log.lock();
        if log.conversation.bound_model.is_none() {
            log.conversation.bound_model = Some(model.to_owned());
            log.conversation.updated_at = chrono::Utc::now();
            log.persist_row()?;
        }
        Ok(())
    }

    /// Append a message, atomically assigning its `sequence_id` (I1).
    /// Serializable per conversation: the conversation's `Mutex` is held
    /// for the whole operation.
    pub fn append(
        &self,
        conversation_id: Uuid,
        kind: MessageKind,
        llm_payload: NeutralMessage,
        usage: Usage,
        display_payload: Option<serde_json::Value>,
    ) -> Result<StoredMessage> {
        let log = self.get_or_load(conversation_id)?;
        let mut log = log.lock();

        let sequence_id = log.messages.len() as u64 + 1;
        let message = StoredMessage {
            message_id: Uuid::new_v4(),
            conversation_id,
            sequence_id,
            kind,
            llm_payload,
            usage,
            display_payload,
            excluded_from_context: false,
            created_at: chrono::Utc::now(),
        };

        log.append_line(&message)?;
        log.messages.push(message.clone());
        log.conversation.updated_at = message.created_at;
        // The row itself doesn't change shape on every append; persisting
        // it is cheap and keeps `updated_at` durable across crashes.
        log.persist_row()?;

        ac_domain::trace::TraceEvent::TranscriptAppend {
            conversation_id: conversation_id.to_string(),
            sequence_id,
            kind: format!("{kind:?}"),
        }
        .emit();

        Ok(message)
    }

    pub fn list(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>> {
        let log = self.get_or_load(conversation_id)?;
        Ok(log.lock().messages.clone())
    }

    pub fn list_after(&self, conversation_id: Uuid, last_seq: u64) -> Result<Vec<StoredMessage>> {
        let log = self.get_or_load(conversation_id)?;
        Ok(log
            .lock()
            .messages
            .iter()
            .filter(|m| m.sequence_id > last_seq)
            .cloned()
            .collect())
    }

    pub fn latest(&self, conversation_id: Uuid) -> Result<Option<StoredMessage>> {
        let log = self.get_or_load(conversation_id)?;
        Ok(log.lock().messages.last().cloned())
    }

    /// Idempotent: setting an already-excluded message to excluded is a
    /// no-op, not an error.
    pub fn set_excluded(&self, conversation_id: Uuid, message_id: Uuid) -> Result<()> {
        let log = self.get_or_load(conversation_id)?;
        let mut log = log.lock();
        let Some(message) = log.messages.iter_mut().find(|m| m.message_id == message_id) else {
            return Err(Error::Other(format!("unknown message: {message_id}")));
        };
        if message.excluded_from_context {
            return Ok(());
        }
        message.excluded_from_context = true;
        // Rewrite the whole log file; exclusion is rare (only the seal
        // step's superseded-block retirement triggers it) so a full
        // rewrite is simpler than an in-place patch of a line-oriented file.
        rewrite_jsonl(&log.log_path, &log.messages)
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<StoredMessage>> {
    let content = fs::read_to_string(path).map_err(Error::Io)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Error::Json))
        .collect()
}

fn rewrite_jsonl(path: &Path, messages: &[StoredMessage]) -> Result<()> {
    let tmp_path = path.with_extension("jsonl.tmp");
    {
        let mut file = fs::File::create(&tmp_path).map_err(Error::Io)?;
        for message in messages {
            let mut line = serde_json::to_vec(message)?;
            line.push(b'\n');
            file.write_all(&line).map_err(Error::Io)?;
        }
        file.sync_data().map_err(Error::Io)?;
    }
    fs::rename(&tmp_path, path).map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_domain::message::ContentBlock;
    use tempfile::TempDir;

    fn store() -> (TempDir, TranscriptStore) {
        let dir = TempDir::new().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn sequence_ids_are_contiguous_from_one() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        store.create_conversation(id, None, None).unwrap();

        for i in 0..5 {
            let m = store
                .append(
                    id,
                    MessageKind::User,
                    NeutralMessage::user(vec![ContentBlock::text(format!("msg {i}"))]),
                    Usage::default(),
                    None,
                )
                .unwrap();
            assert_eq!(m.sequence_id, i + 1);
        }

        let all = store.list(id).unwrap();
        let seqs: Vec<u64> = all.iter().map(|m| m.sequence_id).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn list_after_returns_only_newer_messages() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        store.create_conversation(id, None, None).unwrap();
        for i in 0..3 {
            store
                .append(
                    id,
                    MessageKind::User,
                    NeutralMessage::user(vec![ContentBlock::text(format!("{i}"))]),
                    Usage::default(),
                    None,
                )
                .unwrap();
        }
        let after = store.list_after(id, 1).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].sequence_id, 2);
    }

    #[test]
    fn latest_returns_none_for_empty_conversation() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        store.create_conversation(id, None, None).unwrap();
        assert!(store.latest(id).unwrap().is_none());
    }

    #[test]
    fn unknown_conversation_errors() {
        let (_dir, store) = store();
        let err = store.list(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, Error::UnknownConversation(_)));
    }

    #[test]
    fn set_excluded_is_idempotent() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        store.create_conversation(id, None, None).unwrap();
        let m = store
            .append(
                id,
                MessageKind::User,
                NeutralMessage::user(vec![ContentBlock::text("hi")]),
                Usage::default(),
                None,
            )
            .unwrap();
        store.set_excluded(id, m.message_id).unwrap();
        store.set_excluded(id, m.message_id).unwrap();
        let after = store.list(id).unwrap();
        assert!(after[0].excluded_from_context);
    }

    #[test]
    fn conversation_survives_cold_reload() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        {
            let store = TranscriptStore::new(dir.path()).unwrap();
            store.create_conversation(id, Some("/tmp".into()), None).unwrap();
            store
                .append(
                    id,
                    MessageKind::User,
                    NeutralMessage::user(vec![ContentBlock::text("hello")]),
                    Usage::default(),
                    None,
                )
                .unwrap();
        }
        // Fresh store instance, same state dir: a "crashed and restarted"
        // process should see the same durable history.
        let store = TranscriptStore::new(dir.path()).unwrap();
        let messages = store.list(id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].llm_payload.text_joined(), "hello");
        let conv = store.get_conversation(id).unwrap();
        assert_eq!(conv.cwd_hint.as_deref(), Some("/tmp"));
    }

    #[test]
    fn bind_model_only_sets_once() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        store.create_conversation(id, None, None).unwrap();
        store.bind_model(id, "claude-sonnet-4-5").unwrap();
        store.bind_model(id, "a-different-model").unwrap();
        let conv = store.get_conversation(id).unwrap();
        assert_eq!(conv.bound_model.as_deref(), Some("claude-sonnet-4-5"));
    }
}
