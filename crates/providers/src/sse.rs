//! Shared SSE streaming infrastructure (§4.2 Streaming parse).
//!
//! Every provider follows the same transport pattern: receive a
//! `reqwest::Response`, buffer chunks, split on `\n\n`, extract `data:`
//! payloads. [`drain_data_lines`] and [`sse_response_stream`] implement
//! that transport; [`Assembler`] implements the dispatch-by-`type` state
//! machine that turns the dispatched deltas into a final [`NeutralMessage`].

use ac_domain::error::{Error, Result};
use ac_domain::message::{ContentBlock, NeutralMessage, Role, Usage};
use futures_util::stream::BoxStream;

/// Extract complete `data:` payloads from an SSE buffer. The buffer is
/// drained in place; a trailing partial event is left for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a `BoxStream` of raw `data:` payload strings from an SSE
/// response. Transport-only: dispatch/assembly happens in [`Assembler`].
pub(crate) fn sse_data_stream(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        yield Ok(data);
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            yield Ok(data);
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(crate::util::from_reqwest(e));
                    break;
                }
            }
        }
    };
    Box::pin(stream)
}

/// One dispatched SSE event, already translated into the provider-neutral
/// vocabulary §4.2 describes. A provider's own wire event names are
/// mapped onto these by its adapter before reaching [`Assembler`].
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Skeleton response; `content[]` is discarded and rebuilt from here.
    MessageStart { usage: Option<Usage> },
    /// Materializes a slot at `index`.
    BlockStart { index: usize, block: ContentBlock },
    TextDelta { index: usize, text: String },
    ThinkingDelta { index: usize, text: String },
    SignatureDelta { index: usize, signature: String },
    /// Appended byte-wise to the tool-use input at `index`.
    InputJsonDelta { index: usize, partial_json: String },
    /// No-op per §4.2; kept so callers can still observe it if useful.
    BlockStop { index: usize },
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: Option<u64>,
    },
    Ping,
    Error { message: String },
}

/// Per-`tool_use` slot scratch space: the JSON text accumulates as a
/// string across `input_json_delta` events and is only parsed once the
/// block closes (or the message ends).
struct PendingToolInput {
    buffer: String,
}

/// Assembles a final [`NeutralMessage`] from a dispatched event stream,
/// per §4.2's exact rules. One assembler per in-flight request.
pub struct Assembler {
    started: bool,
    usage: Usage,
    stop_reason: Option<String>,
    blocks: Vec<ContentBlock>,
    pending_tool_inputs: std::collections::HashMap<usize, PendingToolInput>,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            started: false,
            usage: Usage::default(),
            stop_reason: None,
            blocks: Vec::new(),
            pending_tool_inputs: std::collections::HashMap::new(),
        }
    }

    pub fn dispatch(&mut self, event: Dispatch) -> Result<()> {
        match event {
            Dispatch::MessageStart { usage } => {
                self.started = true;
                self.blocks.clear();
                self.pending_tool_inputs.clear();
                if let Some(u) = usage {
                    self.usage = u;
                }
            }
            Dispatch::BlockStart { index, block } => {
                self.ensure_slot(index);
                if let ContentBlock::ToolUse { .. } = &block {
                    self.pending_tool_inputs
                        .insert(index, PendingToolInput { buffer: String::new() });
                }
                self.blocks[index] = block;
            }
            Dispatch::TextDelta { index, text } => {
                self.ensure_slot(index);
                if let ContentBlock::Text { text: t, .. } = &mut self.blocks[index] {
                    t.push_str(&text);
                }
            }
            Dispatch::ThinkingDelta { index, text } => {
                self.ensure_slot(index);
                if let ContentBlock::Thinking { thinking, .. } = &mut self.blocks[index] {
                    thinking.push_str(&text);
                }
            }
            Dispatch::SignatureDelta { index, signature: sig_delta } => {
                self.ensure_slot(index);
                match &mut self.blocks[index] {
                    ContentBlock::Text { signature, .. }
                    | ContentBlock::ToolUse { signature, .. } => {
                        let existing = signature.get_or_insert_with(String::new);
                        existing.push_str(&sig_delta);
                    }
                    ContentBlock::Thinking { signature, .. } => signature.push_str(&sig_delta),
                    _ => {}
                }
            }
            Dispatch::InputJsonDelta { index, partial_json } => {
                self.pending_tool_inputs
                    .entry(index)
                    .or_insert_with(|| PendingToolInput { buffer: String::new() })
                    .buffer
                    .push_str(&partial_json);
            }
            Dispatch::BlockStop { .. } => {}
            Dispatch::MessageDelta { stop_reason, output_tokens } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                if let Some(out) = output_tokens {
                    self.usage.output_tokens = out;
                }
            }
            Dispatch::Ping => {}
            Dispatch::Error { message } => {
                return Err(Error::Provider {
                    provider: "stream".into(),
                    message,
                });
            }
        }
        Ok(())
    }

    fn ensure_slot(&mut self, index: usize) {
        while self.blocks.len() <= index {
            self.blocks.push(ContentBlock::text(String::new()));
        }
    }

    /// Finalize: every `tool_use` block's accumulated input is parsed (or
    /// normalized to `{}` if empty/absent, per §4.2 post-process), and the
    /// message is wrapped with its stop reason as `end_of_turn`.
    pub fn finish(mut self) -> Result<(NeutralMessage, Usage, Option<String>)> {
        if !self.started {
            return Err(Error::Provider {
                provider: "stream".into(),
                message: "stream ended without message_start".into(),
            });
        }

        for (index, pending) in self.pending_tool_inputs.drain() {
            let Some(block) = self.blocks.get_mut(index) else { continue };
            if let ContentBlock::ToolUse { input_json, .. } = block {
                *input_json = if pending.buffer.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&pending.buffer).unwrap_or_else(|_| serde_json::json!({}))
                };
            }
        }

        let has_tool_use = self
            .blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }));

        let message = NeutralMessage {
            role: Role::Assistant,
            end_of_turn: !has_tool_use,
            content: self.blocks,
            error_kind: None,
        };

        Ok((message, self.usage, self.stop_reason))
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}
