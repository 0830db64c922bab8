use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::time::Duration;

use super::accumulator::{CallKey, ToolCallAccumulator};
use super::base::{ChunkSender, Provider};
use super::configs::ProviderConfig;
use super::utils::{
    check_context_length_error, check_unique_tool_names, generate_call_id, parse_event,
    send_checked, sse_events,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::{split_system, ImageRef, Message, Role};
use crate::models::response::{AIResponse, Usage};
use crate::models::tool::{Tool, ToolCall};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_to_anthropic_spec(messages: &[&Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                if message.images.is_empty() {
                    return json!({"role": role, "content": message.content});
                }

                let mut content: Vec<Value> = message
                    .images
                    .iter()
                    .map(|image| match ImageRef::parse(image) {
                        ImageRef::Inline { mime_type, data } => json!({
                            "type": "image",
                            "source": {"type": "base64", "media_type": mime_type, "data": data}
                        }),
                        ImageRef::Url(url) => json!({
                            "type": "image",
                            "source": {"type": "url", "url": url}
                        }),
                    })
                    .collect();
                content.push(json!({"type": "text", "text": message.content}));
                json!({"role": role, "content": content})
            })
            .collect()
    }

    fn tools_to_anthropic_spec(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
        check_unique_tool_names(tools)?;
        Ok(tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect())
    }

    fn create_request_payload(
        &self,
        messages: &[Message],
        tools: &[Tool],
        stream: bool,
    ) -> ProviderResult<Value> {
        let (system, turns) = split_system(messages);
        let mut payload = json!({
            "model": self.config.model,
            "messages": Self::messages_to_anthropic_spec(&turns),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        if let Some(system) = system {
            payload["system"] = json!(system);
        }
        if !tools.is_empty() {
            payload["tools"] = json!(Self::tools_to_anthropic_spec(tools)?);
        }
        if stream {
            payload["stream"] = json!(true);
        }
        Ok(payload)
    }

    fn get_usage(data: &Value) -> Option<Usage> {
        let usage = data.get("usage")?;
        let input_tokens = usage.get("input_tokens").and_then(Value::as_u64)? as u32;
        let output_tokens = usage
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u32;
        Some(Usage::new(input_tokens, output_tokens))
    }

    fn response_to_response(&self, response: &Value) -> ProviderResult<AIResponse> {
        let blocks = response
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("Invalid response format from Anthropic API".into())
            })?;

        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => text.push(block["text"].as_str().unwrap_or_default()),
                Some("tool_use") => {
                    let id = block["id"]
                        .as_str()
                        .map(String::from)
                        .unwrap_or_else(generate_call_id);
                    let name = block["name"].as_str().unwrap_or_default();
                    if name.is_empty() {
                        return Err(ProviderError::InvalidResponse(format!(
                            "Tool call {} has no function name",
                            id
                        )));
                    }
                    let arguments = block["input"].as_object().cloned().unwrap_or_default();
                    tool_calls.push(ToolCall::new(id, name, arguments));
                }
                _ => {}
            }
        }

        Ok(AIResponse::new(text.join("\n"), &self.config.model)
            .with_tool_calls(tool_calls)
            .with_usage(Self::get_usage(response)))
    }

    async fn post(&self, payload: &Value) -> ProviderResult<Response> {
        let url = self.config.url("v1/messages");
        tracing::debug!(%url, model = %self.config.model, "sending anthropic request");

        send_checked(
            self.client
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(payload),
        )
        .await
    }

    async fn consume_stream(
        &self,
        response: Response,
        chunks: ChunkSender,
    ) -> ProviderResult<AIResponse> {
        let mut events = sse_events(response);
        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut tool_calls = Vec::new();
        let mut input_tokens = None;
        let mut output_tokens = 0;
        let mut stopped = false;

        while let Some(event) = events.next().await {
            let event = event?;
            if event.data.trim().is_empty() {
                continue;
            }
            let data = parse_event(&event.data)?;
            let index = data
                .get("index")
                .and_then(Value::as_u64)
                .map(|i| i as usize);

            match data.get("type").and_then(Value::as_str).unwrap_or_default() {
                "message_start" => {
                    if let Some(usage) = Self::get_usage(&data["message"]) {
                        input_tokens = Some(usage.input_tokens);
                        output_tokens = usage.output_tokens;
                    }
                }
                "content_block_start" => {
                    let block = &data["content_block"];
                    if block["type"] == "tool_use" {
                        let key = CallKey::new(block["id"].as_str(), index);
                        let name = block["name"].as_str().unwrap_or_default();
                        match block["input"].as_object() {
                            Some(input) if !input.is_empty() => {
                                accumulator.complete_with(key, name, input.clone())
                            }
                            _ => accumulator.begin(key, Some(name)),
                        }
                    }
                }
                "content_block_delta" => {
                    let delta = &data["delta"];
                    match delta["type"].as_str() {
                        Some("text_delta") => {
                            let text = delta["text"].as_str().unwrap_or_default();
                            content.push_str(text);
                            chunks.content(text).await;
                        }
                        Some("input_json_delta") => {
                            let fragment = delta["partial_json"].as_str().unwrap_or_default();
                            accumulator.push_fragment(CallKey::new(None, index), fragment);
                        }
                        _ => {}
                    }
                }
                "content_block_stop" => {
                    if let Some(call) = index.and_then(|i| accumulator.finish(CallKey::index(i))) {
                        chunks.tool_call(call.clone()).await;
                        tool_calls.push(call);
                    }
                }
                "message_delta" => {
                    if let Some(tokens) = data["usage"]["output_tokens"].as_u64() {
                        output_tokens = tokens as u32;
                    }
                }
                "message_stop" => {
                    stopped = true;
                    break;
                }
                "error" => {
                    let error = &data["error"];
                    return Err(check_context_length_error(error).unwrap_or_else(|| {
                        ProviderError::InvalidResponse(format!("Stream error: {}", error))
                    }));
                }
                other => tracing::debug!(event = other, "ignoring anthropic stream event"),
            }
        }

        if !stopped {
            return Err(ProviderError::InvalidResponse(
                "Stream ended without message_stop".to_string(),
            ));
        }
        for call in accumulator.finish_all() {
            chunks.tool_call(call.clone()).await;
            tool_calls.push(call);
        }
        chunks.done().await;

        let usage = input_tokens.map(|input| Usage::new(input, output_tokens));
        Ok(AIResponse::new(content, &self.config.model)
            .with_tool_calls(tool_calls)
            .with_usage(usage))
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn chat(&self, messages: &[Message], tools: &[Tool]) -> ProviderResult<AIResponse> {
        let payload = self.create_request_payload(messages, tools, false)?;
        let response: Value = self.post(&payload).await?.json().await?;
        self.response_to_response(&response)
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        chunks: ChunkSender,
    ) -> ProviderResult<AIResponse> {
        let payload = self.create_request_payload(messages, tools, true)?;
        let response = self.post(&payload).await?;
        self.consume_stream(response, chunks).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn provider_name(&self) -> &str {
        "Anthropic"
    }
}
