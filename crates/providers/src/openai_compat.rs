//! OpenAI-compatible adapter.
//!
//! Targets the OpenAI chat-completions wire contract shared by OpenAI
//! itself, Ollama, vLLM, LM Studio, Together, and most self-hosted
//! inference servers. Tool results and thinking blocks don't have a
//! native representation in this dialect the way they do in Anthropic's,
//! so this adapter folds tool results into `role: "tool"` messages and
//! drops opaque thinking blocks on the way out (see `messages_to_openai`).

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;

use ac_domain::capability::ProviderCapabilities;
use ac_domain::config::llm::{ModelPricing, ProviderConfig};
use ac_domain::error::{Error, Result};
use ac_domain::message::{ContentBlock, NeutralMessage, Role, Usage};
use futures_util::StreamExt;

use crate::capping::apply_caps;
use crate::request::{Adapter, NeutralRequest, NeutralResponse, RequestContext, ToolChoice, ToolDefinition};
use crate::retry::with_retry;
use crate::sse::{sse_data_stream, Assembler, Dispatch};
use crate::util::{apply_auth, from_reqwest};

pub struct OpenAiCompatAdapter {
    id: String,
    base_url: String,
    auth: ac_domain::config::llm::AuthConfig,
    default_model: String,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
    pricing: HashMap<String, ModelPricing>,
}

impl OpenAiCompatAdapter {
    pub fn from_config(
        cfg: &ProviderConfig,
        timeout_ms: u64,
        pricing: HashMap<String, ModelPricing>,
    ) -> Result<Self> {
        let default_model = cfg.default_model.clone().unwrap_or_else(|| "gpt-4o".into());

        let capabilities = ProviderCapabilities {
            supports_tools: true,
            supports_streaming: true,
            context_window_tokens: Some(128_000),
            max_output_tokens: Some(16_384),
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            auth: cfg.auth.clone(),
            default_model,
            capabilities,
            client,
            pricing,
        })
    }

    fn build_body(&self, request: &NeutralRequest, model: &str) -> Result<Value> {
        let caps = apply_caps(
            request.max_output_tokens,
            request.thinking_budget,
            self.capabilities.max_output_tokens,
        );

        let mut messages = Vec::new();
        if !request.system.is_empty() {
            let text = request
                .system
                .iter()
                .filter_map(|b| b.as_text())
                .collect::<Vec<_>>()
                .join("\n\n");
            messages.push(serde_json::json!({"role": "system", "content": text}));
        }
        messages.extend(messages_to_openai(&request.messages));

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": caps.max_output_tokens,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = tool_choice_to_openai(request.tool_choice);
        }

        if !request.stop_sequences.is_empty() {
            body["stop"] = serde_json::json!(request.stop_sequences);
        }

        Ok(body)
    }

    async fn attempt(
        &self,
        body: &Value,
    ) -> std::result::Result<(NeutralMessage, Usage, Option<String>), (Error, Option<u16>)> {
        let url = format!("{}/chat/completions", self.base_url);

        let builder = self.client.post(&url).header("content-type", "application/json");
        let builder = apply_auth(builder, &self.auth).map_err(|e| (e, None))?;

        let resp = builder
            .json(body)
            .send()
            .await
            .map_err(|e| (from_reqwest(e), None))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err((
                Error::Provider {
                    provider: self.id.clone(),
                    message: format!("HTTP {} - {text}", status.as_u16()),
                },
                Some(status.as_u16()),
            ));
        }

        let mut stream = sse_data_stream(resp);
        let mut assembler = Assembler::new();
        assembler
            .dispatch(Dispatch::MessageStart { usage: None })
            .map_err(|e| (e, None))?;

        let mut state = StreamState::default();
        let mut final_usage: Option<Usage> = None;
        let mut stop_reason: Option<String> = None;

        while let Some(data) = stream.next().await {
            let data = data.map_err(|e| (e, None))?;
            if data.trim() == "[DONE]" {
                break;
            }
            let chunk: Value = serde_json::from_str(&data).map_err(|e| (Error::Json(e), None))?;

            if let Some(usage) = chunk.get("usage").and_then(parse_usage) {
                final_usage = Some(usage);
            }

            let Some(choice) = chunk.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first())
            else {
                continue;
            };

            if let Some(fr) = choice.get("finish_reason").and_then(|v| v.as_str()) {
                stop_reason = Some(fr.to_string());
            }

            let Some(delta) = choice.get("delta") else { continue };

            if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    let (index, is_new) = state.text_slot();
                    if is_new {
                        assembler
                            .dispatch(Dispatch::BlockStart { index, block: ContentBlock::text("") })
                            .map_err(|e| (e, None))?;
                    }
                    assembler
                        .dispatch(Dispatch::TextDelta { index, text: text.to_string() })
                        .map_err(|e| (e, None))?;
                }
            }

            if let Some(tool_calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                for tc in tool_calls {
                    let openai_index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);

                    if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                        let name = tc
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string();
                        let slot = state.new_tool_slot(openai_index);
                        assembler
                            .dispatch(Dispatch::BlockStart {
                                index: slot,
                                block: ContentBlock::tool_use(id, name, Value::Null),
                            })
                            .map_err(|e| (e, None))?;
                    }

                    if let Some(args) = tc
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(|v| v.as_str())
                    {
                        if let Some(slot) = state.tool_slot(openai_index) {
                            assembler
                                .dispatch(Dispatch::InputJsonDelta { index: slot, partial_json: args.to_string() })
                                .map_err(|e| (e, None))?;
                        }
                    }
                }
            }
        }

        let (message, mut usage, _) = assembler.finish().map_err(|e| (e, None))?;
        if let Some(u) = final_usage {
            usage = u;
        }
        Ok((message, usage, stop_reason))
    }
}

#[async_trait::async_trait]
impl Adapter for OpenAiCompatAdapter {
    async fn do_request(&self, ctx: &RequestContext, request: NeutralRequest) -> Result<NeutralResponse> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };
        let body = self.build_body(&request, &model)?;
        let start_time = Utc::now();

        let (message, mut usage, stop_reason) = with_retry(&ctx.cancel, &self.id, |_attempt| {
            let body = body.clone();
            async move { self.attempt(&body).await }
        })
        .await?;

        if let Some(pricing) = self.pricing.get(&model) {
            usage.cost_usd = Some(pricing.estimate_cost(usage.input_tokens, usage.output_tokens));
        }

        let end_time = Utc::now();

        Ok(NeutralResponse {
            message,
            usage,
            model,
            stop_reason,
            start_time,
            end_time,
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }
}

/// Tracks the assembler content-block index assigned to the single text
/// slot and to each in-flight tool call, since OpenAI's own `tool_calls[].index`
/// is scoped to tool calls only and can collide with the text slot's index.
#[derive(Default)]
struct StreamState {
    next_index: usize,
    text_index: Option<usize>,
    tool_indices: HashMap<u64, usize>,
}

impl StreamState {
    fn text_slot(&mut self) -> (usize, bool) {
        match self.text_index {
            Some(i) => (i, false),
            None => {
                let i = self.next_index;
                self.next_index += 1;
                self.text_index = Some(i);
                (i, true)
            }
        }
    }

    fn new_tool_slot(&mut self, openai_index: u64) -> usize {
        let i = self.next_index;
        self.next_index += 1;
        self.tool_indices.insert(openai_index, i);
        i
    }

    fn tool_slot(&self, openai_index: u64) -> Option<usize> {
        self.tool_indices.get(&openai_index).copied()
    }
}

// ── Request-side mapping ────────────────────────────────────────────

fn messages_to_openai(messages: &[NeutralMessage]) -> Vec<Value> {
    let mut out = Vec::new();
    for message in messages {
        match message.role {
            Role::Assistant => out.push(assistant_to_openai(&message.content)),
            Role::User => {
                let mut buffer: Vec<&ContentBlock> = Vec::new();
                for block in &message.content {
                    if let ContentBlock::ToolResult { tool_use_id, is_error, result, .. } = block {
                        if !buffer.is_empty() {
                            out.push(user_content_message(&buffer));
                            buffer.clear();
                        }
                        out.push(tool_result_to_openai(tool_use_id, *is_error, result));
                    } else {
                        buffer.push(block);
                    }
                }
                if !buffer.is_empty() {
                    out.push(user_content_message(&buffer));
                }
            }
        }
    }
    out
}

fn assistant_to_openai(content: &[ContentBlock]) -> Value {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in content {
        match block {
            ContentBlock::Text { text, .. } => text_parts.push(text.clone()),
            ContentBlock::ToolUse { id, tool_name, input_json, .. } => {
                tool_calls.push(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": tool_name, "arguments": input_json.to_string()},
                }));
            }
            // Thinking/redacted_thinking have no wire representation in
            // this dialect; they round-trip through the durable transcript
            // but are not sent back upstream.
            _ => {}
        }
    }

    let mut obj = serde_json::json!({"role": "assistant"});
    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn user_content_message(blocks: &[&ContentBlock]) -> Value {
    let has_image = blocks.iter().any(|b| matches!(b, ContentBlock::Image { .. }));
    if !has_image {
        let text = blocks
            .iter()
            .filter_map(|b| b.as_text())
            .collect::<Vec<_>>()
            .join("\n");
        return serde_json::json!({"role": "user", "content": text});
    }

    let parts: Vec<Value> = blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text, .. } => serde_json::json!({"type": "text", "text": text}),
            ContentBlock::Image { media_type, base64_data } => serde_json::json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{media_type};base64,{base64_data}")},
            }),
            _ => serde_json::json!({"type": "text", "text": ""}),
        })
        .collect();
    serde_json::json!({"role": "user", "content": parts})
}

fn tool_result_to_openai(tool_use_id: &str, is_error: bool, result: &[ContentBlock]) -> Value {
    let mut text = result
        .iter()
        .filter_map(|b| b.as_text())
        .collect::<Vec<_>>()
        .join("\n");
    if is_error {
        text = format!("[error] {text}");
    }
    serde_json::json!({"role": "tool", "tool_call_id": tool_use_id, "content": text})
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn tool_choice_to_openai(choice: ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".into()),
        ToolChoice::Required => Value::String("required".into()),
        ToolChoice::None => Value::String("none".into()),
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        input_tokens: v.get("prompt_tokens")?.as_u64()?,
        output_tokens: v.get("completion_tokens")?.as_u64()?,
        cache_creation_read_tokens: 0,
        cache_read_tokens: 0,
        cost_usd: None,
    })
}
