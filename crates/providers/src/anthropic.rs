//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API, including tool use, thinking
//! blocks, and streaming. Anthropic's wire dialect is the one our neutral
//! model is closest to (system is a separate top-level field; tool results
//! are user-role content blocks) so this adapter is mostly a straight
//! 1:1 translation.

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

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    id: String,
    base_url: String,
    auth: ac_domain::config::llm::AuthConfig,
    default_model: String,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
    pricing: HashMap<String, ModelPricing>,
}

impl AnthropicAdapter {
    pub fn from_config(
        cfg: &ProviderConfig,
        timeout_ms: u64,
        pricing: HashMap<String, ModelPricing>,
    ) -> Result<Self> {
        let default_model = cfg
            .default_model
            .clone()
            .unwrap_or_else(|| "claude-sonnet-4-5".into());

        let capabilities = ProviderCapabilities {
            supports_tools: true,
            supports_streaming: true,
            context_window_tokens: Some(200_000),
            max_output_tokens: Some(8_192),
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

        let mut system_blocks: Vec<Value> = Vec::new();
        for block in &request.system {
            if let Some(text) = block.as_text() {
                system_blocks.push(serde_json::json!({"type": "text", "text": text}));
            }
        }

        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(neutral_message_to_anthropic)
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": caps.max_output_tokens,
            "stream": true,
        });

        if !system_blocks.is_empty() {
            body["system"] = Value::Array(system_blocks);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = tool_choice_to_anthropic(request.tool_choice);
        }

        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop_sequences);
        }

        if let Some(budget) = caps.thinking_budget {
            body["thinking"] = serde_json::json!({"type": "enabled", "budget_tokens": budget});
        }

        Ok(body)
    }

    async fn attempt(
        &self,
        body: &Value,
    ) -> std::result::Result<(NeutralMessage, Usage, Option<String>), (Error, Option<u16>)> {
        let url = format!("{}/v1/messages", self.base_url);

        let builder = self
            .client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");
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

        while let Some(data) = stream.next().await {
            let data = data.map_err(|e| (e, None))?;
            if data.trim() == "[DONE]" {
                break;
            }
            let Some(dispatch) = parse_event(&data).map_err(|e| (e, None))? else {
                continue;
            };
            assembler.dispatch(dispatch).map_err(|e| (e, None))?;
        }

        assembler.finish().map_err(|e| (e, None))
    }
}

#[async_trait::async_trait]
impl Adapter for AnthropicAdapter {
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

// ── Request-side mapping ────────────────────────────────────────────

fn neutral_message_to_anthropic(message: &NeutralMessage) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content: Vec<Value> = message.content.iter().map(content_block_to_anthropic).collect();
    serde_json::json!({"role": role, "content": content})
}

fn content_block_to_anthropic(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text, cache, .. } => {
            let mut v = serde_json::json!({"type": "text", "text": text});
            if let Some(cache) = cache {
                v["cache_control"] = cache.clone();
            }
            v
        }
        ContentBlock::Thinking { thinking, signature } => {
            serde_json::json!({"type": "thinking", "thinking": thinking, "signature": signature})
        }
        ContentBlock::RedactedThinking { data, .. } => {
            serde_json::json!({"type": "redacted_thinking", "data": data})
        }
        ContentBlock::ToolUse { id, tool_name, input_json, cache, .. } => {
            let mut v = serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": tool_name,
                "input": input_json,
            });
            if let Some(cache) = cache {
                v["cache_control"] = cache.clone();
            }
            v
        }
        ContentBlock::ToolResult { tool_use_id, is_error, result, .. } => {
            let content: Vec<Value> = result.iter().map(content_block_to_anthropic).collect();
            serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            })
        }
        ContentBlock::Image { media_type, base64_data } => {
            serde_json::json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": base64_data},
            })
        }
    }
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

fn tool_choice_to_anthropic(choice: ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => serde_json::json!({"type": "auto"}),
        ToolChoice::Required => serde_json::json!({"type": "any"}),
        ToolChoice::None => serde_json::json!({"type": "none"}),
    }
}

// ── Response-side mapping: SSE event → Dispatch ─────────────────────

fn parse_event(data: &str) -> Result<Option<Dispatch>> {
    let v: Value = serde_json::from_str(data)?;
    let event_type = v.get("type").and_then(|v| v.as_str()).unwrap_or("");

    let dispatch = match event_type {
        "message_start" => {
            let usage = v
                .get("message")
                .and_then(|m| m.get("usage"))
                .and_then(parse_usage);
            Dispatch::MessageStart { usage }
        }
        "content_block_start" => {
            let index = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let block = v.get("content_block").ok_or_else(|| Error::Provider {
                provider: "anthropic".into(),
                message: "content_block_start missing content_block".into(),
            })?;
            Dispatch::BlockStart { index, block: parse_block_start(block) }
        }
        "content_block_delta" => {
            let index = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let delta = v.get("delta").ok_or_else(|| Error::Provider {
                provider: "anthropic".into(),
                message: "content_block_delta missing delta".into(),
            })?;
            let delta_type = delta.get("type").and_then(|v| v.as_str()).unwrap_or("");
            match delta_type {
                "text_delta" => Dispatch::TextDelta {
                    index,
                    text: delta.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                },
                "thinking_delta" => Dispatch::ThinkingDelta {
                    index,
                    text: delta.get("thinking").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                },
                "signature_delta" => Dispatch::SignatureDelta {
                    index,
                    signature: delta.get("signature").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                },
                "input_json_delta" => Dispatch::InputJsonDelta {
                    index,
                    partial_json: delta.get("partial_json").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                },
                _ => return Ok(None),
            }
        }
        "content_block_stop" => {
            let index = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            Dispatch::BlockStop { index }
        }
        "message_delta" => {
            let stop_reason = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|v| v.as_str())
                .map(String::from);
            let output_tokens = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_u64());
            Dispatch::MessageDelta { stop_reason, output_tokens }
        }
        "ping" => Dispatch::Ping,
        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown upstream error")
                .to_string();
            Dispatch::Error { message }
        }
        _ => return Ok(None),
    };

    Ok(Some(dispatch))
}

fn parse_block_start(block: &Value) -> ContentBlock {
    let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match block_type {
        "tool_use" => {
            let id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            ContentBlock::tool_use(id, name, serde_json::Value::Null)
        }
        "thinking" => ContentBlock::Thinking { thinking: String::new(), signature: String::new() },
        "redacted_thinking" => ContentBlock::RedactedThinking {
            data: block.get("data").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            signature: String::new(),
        },
        _ => ContentBlock::text(""),
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        input_tokens: v.get("input_tokens")?.as_u64()?,
        output_tokens: v.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        cache_creation_read_tokens: v
            .get("cache_creation_input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        cache_read_tokens: v.get("cache_read_input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        cost_usd: None,
    })
}
