use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::time::Duration;

use super::accumulator::{CallKey, ToolCallAccumulator};
use super::base::{ChunkSender, Provider};
use super::configs::ProviderConfig;
use super::utils::{
    check_context_length_error, messages_to_openai_spec, openai_response_to_response,
    openai_usage, parse_event, send_checked, sse_events, tools_to_openai_spec,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::Message;
use crate::models::response::AIResponse;
use crate::models::tool::Tool;

pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn create_request_payload(
        &self,
        messages: &[Message],
        tools: &[Tool],
        stream: bool,
    ) -> ProviderResult<Value> {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_to_openai_spec(messages),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(tools)?);
        }
        if stream {
            payload["stream"] = json!(true);
            payload["stream_options"] = json!({"include_usage": true});
        }
        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> ProviderResult<Response> {
        let url = self.config.url("v1/chat/completions");
        tracing::debug!(%url, model = %self.config.model, "sending openai request");

        send_checked(
            self.client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(payload),
        )
        .await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn chat(&self, messages: &[Message], tools: &[Tool]) -> ProviderResult<AIResponse> {
        let payload = self.create_request_payload(messages, tools, false)?;
        let response: Value = self.post(&payload).await?.json().await?;
        openai_response_to_response(&response, &self.config.model)
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        chunks: ChunkSender,
    ) -> ProviderResult<AIResponse> {
        let payload = self.create_request_payload(messages, tools, true)?;
        let response = self.post(&payload).await?;
        consume_openai_stream(response, &self.config.model, chunks).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn provider_name(&self) -> &str {
        "OpenAI"
    }
}

/// Drive an openai style chat completion stream to completion
///
/// Content deltas are forwarded as they arrive. Tool call argument fragments are
/// accumulated per call and the calls are emitted once `finish_reason` marks the turn
/// complete. `Done` follows the `[DONE]` sentinel or the end of the body.
pub(crate) async fn consume_openai_stream(
    response: Response,
    model: &str,
    chunks: ChunkSender,
) -> ProviderResult<AIResponse> {
    let mut events = sse_events(response);
    let mut content = String::new();
    let mut accumulator = ToolCallAccumulator::new();
    let mut tool_calls = Vec::new();
    let mut usage = None;
    let mut finished = false;

    while let Some(event) = events.next().await {
        let event = event?;
        let data = event.data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            finished = true;
            break;
        }

        let value = parse_event(data)?;
        if let Some(error) = value.get("error") {
            return Err(check_context_length_error(error).unwrap_or_else(|| {
                ProviderError::InvalidResponse(format!("Stream error: {}", error))
            }));
        }
        if let Some(reported) = openai_usage(&value) {
            usage = Some(reported);
        }

        // the trailing usage event carries no choices
        let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else {
            continue;
        };

        let delta = &choice["delta"];
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            content.push_str(text);
            chunks.content(text).await;
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let key = CallKey::new(
                    call.get("id").and_then(Value::as_str),
                    call.get("index").and_then(Value::as_u64).map(|i| i as usize),
                );
                let function = call.get("function");
                accumulator.begin(
                    key,
                    function.and_then(|f| f.get("name")).and_then(Value::as_str),
                );
                if let Some(fragment) = function
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                {
                    accumulator.push_fragment(key, fragment);
                }
            }
        }

        if choice
            .get("finish_reason")
            .is_some_and(|reason| !reason.is_null())
        {
            finished = true;
            for call in accumulator.finish_all() {
                chunks.tool_call(call.clone()).await;
                tool_calls.push(call);
            }
        }
    }

    if !finished {
        return Err(ProviderError::InvalidResponse(
            "Stream ended before the completion finished".to_string(),
        ));
    }
    // a [DONE] without finish_reason still completes any pending calls
    for call in accumulator.finish_all() {
        chunks.tool_call(call.clone()).await;
        tool_calls.push(call);
    }
    chunks.done().await;

    Ok(AIResponse::new(content, model)
        .with_tool_calls(tool_calls)
        .with_usage(usage))
}
