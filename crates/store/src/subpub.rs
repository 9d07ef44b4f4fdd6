//! C5 Subpub — per-conversation publish/subscribe fan-out (§4.5).
//!
//! Two delivery modes, deliberately different in their backpressure
//! behavior:
//!
//! - [`Subpub::publish`] is sequence-ordered and exactly-once per
//!   watermark: a subscriber either receives every event from the
//!   watermark it asked for onward, or it is torn down (`ok: false`) so
//!   it can resync from the store via `list_after`. An event is never
//!   silently dropped.
//! - [`Subpub::broadcast`] is unsequenced (used for things like token
//!   deltas during streaming) and may be silently dropped for a slow
//!   subscriber — the subscriber is expected to miss at most a display
//!   update, never a piece of the durable transcript.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One item handed to a subscriber: either a live event or a teardown
/// signal (`ok = false`) telling it the channel is closing early.
#[derive(Debug, Clone)]
pub struct SubpubFrame<T> {
    pub ok: bool,
    pub sequence_id: Option<u64>,
    pub event: Option<T>,
}

impl<T> SubpubFrame<T> {
    fn event(sequence_id: Option<u64>, event: T) -> Self {
        Self {
            ok: true,
            sequence_id,
            event: Some(event),
        }
    }

    fn teardown() -> Self {
        Self {
            ok: false,
            sequence_id: None,
            event: None,
        }
    }
}

/// Bound on a subscriber's queue before a `publish` forces it closed.
/// Generous enough that a normal client reading an SSE stream never
/// trips it; it exists so one wedged HTTP connection can't grow memory
/// without bound.
const PUBLISH_QUEUE_CAPACITY: usize = 1024;
const BROADCAST_QUEUE_CAPACITY: usize = 256;

struct Subscriber<T> {
    watermark: u64,
    publish_tx: mpsc::Sender<SubpubFrame<T>>,
    broadcast_tx: mpsc::Sender<SubpubFrame<T>>,
}

struct Topic<T> {
    next_subscriber_id: u64,
    subscribers: HashMap<u64, Subscriber<T>>,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            next_subscriber_id: 0,
            subscribers: HashMap::new(),
        }
    }
}

/// A live subscription. Dropping it unregisters the subscriber.
pub struct Subscription<T> {
    conversation_id: uuid::Uuid,
    subscriber_id: u64,
    topics: Arc<Mutex<HashMap<uuid::Uuid, Topic<T>>>>,
    publish_rx: mpsc::Receiver<SubpubFrame<T>>,
    broadcast_rx: mpsc::Receiver<SubpubFrame<T>>,
}

impl<T> Subscription<T> {
    /// Wait for the next frame, preferring ordered `publish` frames over
    /// unsequenced `broadcast` frames when both are ready — a caller
    /// racing both channels should never starve the durable stream in
    /// favor of the best-effort one.
    pub async fn recv(&mut self) -> Option<SubpubFrame<T>> {
        tokio::select! {
            biased;
            frame = self.publish_rx.recv() => frame,
            frame = self.broadcast_rx.recv() => frame,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(topic) = self.topics.lock().get_mut(&self.conversation_id) {
            topic.subscribers.remove(&self.subscriber_id);
        }
    }
}

/// In-memory fan-out primitive, scoped per conversation. Has no
/// dependency on [`crate::TranscriptStore`] of its own — the gateway
/// wires the two together (append to the store, then publish the
/// resulting sequence ID and event here).
#[derive(Default)]
pub struct Subpub<T> {
    topics: Arc<Mutex<HashMap<uuid::Uuid, Topic<T>>>>,
}

impl<T: Clone + Send + 'static> Subpub<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a conversation's events, starting from `watermark`
    /// (typically the client's `last_sequence_id`). Catch-up delivery of
    /// anything already past the watermark is the caller's
    /// responsibility (via the store) before or while draining this
    /// subscription; `Subpub` itself only fans out events published
    /// after the call returns.
    pub fn subscribe(&self, conversation_id: uuid::Uuid, watermark: u64) -> Subscription<T> {
        let (publish_tx, publish_rx) = mpsc::channel(PUBLISH_QUEUE_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_CAPACITY);

        let subscriber_id = {
            let mut topics = self.topics.lock();
            let topic = topics.entry(conversation_id).or_default();
            let id = topic.next_subscriber_id;
            topic.next_subscriber_id += 1;
            topic.subscribers.insert(
                id,
                Subscriber {
                    watermark,
                    publish_tx,
                    broadcast_tx,
                },
            );
            id
        };

        Subscription {
            conversation_id,
            subscriber_id,
            topics: self.topics.clone(),
            publish_rx,
            broadcast_rx,
        }
    }

    /// Deliver a sequenced, durable event. Every subscriber whose
    /// watermark is at or below `sequence_id` receives it; a subscriber
    /// whose queue is full is torn down (`ok = false`, then removed)
    /// rather than the event being dropped or the publisher blocking —
    /// the spec guarantees publish events are never silently dropped,
    /// and that guarantee is upheld by sacrificing the slow subscriber,
    /// not the event.
    pub fn publish(&self, conversation_id: uuid::Uuid, sequence_id: u64, event: T) {
        let mut topics = self.topics.lock();
        let Some(topic) = topics.get_mut(&conversation_id) else {
            return;
        };

        let mut to_remove = Vec::new();
        for (&id, subscriber) in topic.subscribers.iter_mut() {
            if sequence_id <= subscriber.watermark {
                continue;
            }
            let frame = SubpubFrame::event(Some(sequence_id), event.clone());
            match subscriber.publish_tx.try_send(frame) {
                Ok(()) => subscriber.watermark = sequence_id,
                Err(_) => to_remove.push(id),
            }
        }

        for id in to_remove {
            if let Some(subscriber) = topic.subscribers.remove(&id) {
                let _ = subscriber.publish_tx.try_send(SubpubFrame::teardown());
            }
        }
    }

    /// Deliver an unsequenced, best-effort event to every current
    /// subscriber. A full queue silently drops the event for that one
    /// subscriber — used for streaming token deltas, where missing an
    /// intermediate frame is harmless as long as the final durable
    /// message still lands via `publish`.
    pub fn broadcast(&self, conversation_id: uuid::Uuid, event: T) {
        let topics = self.topics.lock();
        let Some(topic) = topics.get(&conversation_id) else {
            return;
        };
        for subscriber in topic.subscribers.values() {
            let _ = subscriber
                .broadcast_tx
                .try_send(SubpubFrame::event(None, event.clone()));
        }
    }

    /// Tear down every subscriber of a conversation, e.g. when its
    /// manager is evicted. Each subscriber receives a closing
    /// `ok = false` frame rather than simply having its channel dropped,
    /// so a reader blocked in `recv` observes an explicit signal instead
    /// of an ambiguous `None`.
    pub fn close_conversation(&self, conversation_id: uuid::Uuid) {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.remove(&conversation_id) {
            for subscriber in topic.subscribers.into_values() {
                let _ = subscriber.publish_tx.try_send(SubpubFrame::teardown());
            }
        }
    }
}
