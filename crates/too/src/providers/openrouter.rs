use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{ChunkSender, Provider};
use super::configs::ProviderConfig;
use super::openai::consume_openai_stream;
use super::utils::{
    messages_to_openai_spec, openai_response_to_response, send_checked, tools_to_openai_spec,
};
use crate::errors::ProviderResult;
use crate::models::message::Message;
use crate::models::response::AIResponse;
use crate::models::tool::Tool;

pub const OPENROUTER_REFERER: &str = "https://github.com/too-cli/too";
pub const OPENROUTER_TITLE: &str = "too";

/// OpenRouter speaks the openai chat completion dialect behind its own base url
pub struct OpenRouterProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenRouterProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
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
        let url = self.config.url("chat/completions");
        tracing::debug!(%url, model = %self.config.model, "sending openrouter request");

        send_checked(
            self.client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .header("HTTP-Referer", OPENROUTER_REFERER)
                .header("X-Title", OPENROUTER_TITLE)
                .json(payload),
        )
        .await
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
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
        "OpenRouter"
    }
}
