//! `GET /conversation/{id}/stream?last_sequence_id=N` (§6): one JSON object
//! per SSE `data:` frame, catching the subscriber up from the store before
//! handing off to live [`ac_store::Subpub`] delivery.

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ac_domain::conversation::{Conversation, StoredMessage};

use crate::runtime::SubpubEvent;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    last_sequence_id: Option<u64>,
}

#[derive(Debug, Default, Serialize)]
struct StreamFrame {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    messages: Vec<StoredMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation: Option<Conversation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_state: Option<ConversationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_window_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heartbeat: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ConversationState {
    conversation_id: Uuid,
    working: bool,
    model: Option<String>,
}

pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let conversation = match state.store.get_conversation(id) {
        Ok(c) => c,
        Err(e) => {
            return single_error_event(e.to_string()).into_response();
        }
    };

    let manager = state.registry.get_or_create(id).ok();
    let working = manager.as_ref().map(|m| m.is_working()).unwrap_or(false);
    let model = manager.as_ref().and_then(|m| m.get_model()).or(conversation.bound_model.clone());
    let conversation_state = ConversationState {
        conversation_id: id,
        working,
        model,
    };

    let watermark = query.last_sequence_id.unwrap_or(0);

    let initial_frame = if query.last_sequence_id.is_none() {
        let messages = match state.store.list(id) {
            Ok(m) => m,
            Err(e) => return single_error_event(e.to_string()).into_response(),
        };
        StreamFrame {
            messages,
            conversation: Some(conversation),
            conversation_state: Some(conversation_state),
            ..Default::default()
        }
    } else {
        StreamFrame {
            conversation_state: Some(conversation_state),
            heartbeat: Some(true),
            ..Default::default()
        }
    };

    let subscription = state.subpub.subscribe(id, watermark);

    let stream = make_sse_stream(id, initial_frame, subscription);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn make_sse_stream(
    conversation_id: Uuid,
    initial_frame: StreamFrame,
    mut subscription: ac_store::Subscription<SubpubEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        yield Ok(frame_event(&initial_frame));

        while let Some(frame) = subscription.recv().await {
            if !frame.ok {
                // Torn down (evicted conversation or a too-slow reader);
                // the client is expected to reconnect with its last-seen
                // `last_sequence_id` and resync from the store.
                break;
            }
            let Some(event) = frame.event else { continue };
            let out = match event {
                SubpubEvent::Message(message) => {
                    // §4.6: "a freshly computed context_window_used (if the
                    // message carries usage data; otherwise zero, which
                    // subscribers treat as 'no change')" — omit the field
                    // entirely in the zero case rather than sending a `0`
                    // subscribers would have to special-case.
                    let context_window_size = Some(message.usage.context_window_used())
                        .filter(|&n| n > 0);
                    StreamFrame {
                        messages: vec![message],
                        context_window_size,
                        ..Default::default()
                    }
                }
                SubpubEvent::WorkingStateChange { working, model } => StreamFrame {
                    conversation_state: Some(ConversationState {
                        conversation_id,
                        working,
                        model,
                    }),
                    ..Default::default()
                },
            };
            yield Ok(frame_event(&out));
        }
    }
}

fn frame_event(frame: &StreamFrame) -> Event {
    Event::default().data(serde_json::to_string(frame).unwrap_or_default())
}

fn single_error_event(message: String) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = futures_util::stream::once(async move {
        Ok(Event::default()
            .event("error")
            .data(serde_json::json!({ "error": message }).to_string()))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
