use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::accumulator::{parse_arguments, CallKey, ToolCallAccumulator};
use super::base::{ChunkSender, Provider};
use super::configs::ProviderConfig;
use super::utils::{generate_call_id, ndjson_lines, send_checked, tools_to_openai_spec};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::{split_system, ImageRef, Message};
use crate::models::response::{AIResponse, Usage};
use crate::models::tool::{Tool, ToolCall};

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "llama3";

// Ollama native chat api, one json document per line when streaming
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl OllamaResponse {
    fn usage(&self) -> Option<Usage> {
        let input_tokens = self.prompt_eval_count?;
        Some(Usage::new(input_tokens, self.eval_count.unwrap_or_default()))
    }
}

impl OllamaToolCall {
    fn into_tool_call(self) -> ToolCall {
        let id = self.id.filter(|id| !id.is_empty()).unwrap_or_else(generate_call_id);
        let arguments = match self.function.arguments {
            Value::Object(arguments) => arguments,
            Value::String(text) => parse_arguments(&id, &text),
            _ => Map::new(),
        };
        ToolCall::new(id, self.function.name, arguments)
    }
}

pub struct OllamaProvider {
    client: Client,
    config: ProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_to_ollama_spec(messages: &[Message]) -> Vec<Value> {
        let (system, turns) = split_system(messages);
        let mut spec = Vec::with_capacity(turns.len() + 1);
        if let Some(system) = system {
            spec.push(json!({"role": "system", "content": system}));
        }

        for message in turns {
            let mut entry = json!({
                "role": message.role.as_str(),
                "content": message.content,
            });
            let images: Vec<&str> = message
                .images
                .iter()
                .filter_map(|image| match ImageRef::parse(image) {
                    ImageRef::Inline { data, .. } => Some(data),
                    ImageRef::Url(url) => {
                        tracing::warn!(url, "ollama only accepts base64 images, dropping image");
                        None
                    }
                })
                .collect();
            if !images.is_empty() {
                entry["images"] = json!(images);
            }
            spec.push(entry);
        }
        spec
    }

    fn create_request_payload(
        &self,
        messages: &[Message],
        tools: &[Tool],
        stream: bool,
    ) -> ProviderResult<Value> {
        let mut payload = json!({
            "model": self.config.model,
            "messages": Self::messages_to_ollama_spec(messages),
            "stream": stream,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens,
            },
        });
        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(tools)?);
        }
        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> ProviderResult<Response> {
        let url = self.config.url("api/chat");
        tracing::debug!(%url, model = %self.config.model, "sending ollama request");

        send_checked(self.client.post(&url).json(payload)).await
    }

    fn parse_line(line: &str) -> ProviderResult<OllamaResponse> {
        let mut response: OllamaResponse = serde_json::from_str(line).map_err(|e| {
            ProviderError::InvalidResponse(format!("Could not decode ollama response: {}", e))
        })?;
        match response.error.take() {
            Some(error) => Err(ProviderError::InvalidResponse(error)),
            None => Ok(response),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn chat(&self, messages: &[Message], tools: &[Tool]) -> ProviderResult<AIResponse> {
        let payload = self.create_request_payload(messages, tools, false)?;
        let body = self.post(&payload).await?.text().await?;
        let response = Self::parse_line(&body)?;
        let usage = response.usage();

        let message = response.message.ok_or_else(|| {
            ProviderError::InvalidResponse("No message in ollama response".to_string())
        })?;
        let tool_calls = message
            .tool_calls
            .into_iter()
            .map(OllamaToolCall::into_tool_call)
            .collect();

        Ok(AIResponse::new(message.content, &self.config.model)
            .with_tool_calls(tool_calls)
            .with_usage(usage))
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        chunks: ChunkSender,
    ) -> ProviderResult<AIResponse> {
        let payload = self.create_request_payload(messages, tools, true)?;
        let mut lines = ndjson_lines(self.post(&payload).await?);

        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut tool_calls = Vec::new();
        let mut usage = None;
        let mut finished = false;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ProviderError::NetworkFailure(e.to_string()))?
        {
            if line.trim().is_empty() {
                continue;
            }
            let response = Self::parse_line(&line)?;
            if response.done {
                usage = response.usage();
                finished = true;
            }

            let Some(message) = response.message else {
                continue;
            };
            content.push_str(&message.content);
            chunks.content(message.content).await;

            // whole calls arrive on a single line and are handed out right away
            for call in message.tool_calls {
                let call = call.into_tool_call();
                let key = CallKey::id(&call.id);
                accumulator.complete_with(key, &call.name, call.arguments.clone());
                if let Some(call) = accumulator.finish(key) {
                    chunks.tool_call(call.clone()).await;
                    tool_calls.push(call);
                }
            }

            if finished {
                break;
            }
        }

        if !finished {
            return Err(ProviderError::InvalidResponse(
                "Stream ended before ollama reported done".to_string(),
            ));
        }
        chunks.done().await;

        Ok(AIResponse::new(content, &self.config.model)
            .with_tool_calls(tool_calls)
            .with_usage(usage))
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn provider_name(&self) -> &str {
        "Ollama"
    }
}
