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
use crate::models::tool::Tool;

/// Gemini through the generative language api
///
/// Gemini returns function calls whole, inside candidate snapshots. While streaming only
/// text is forwarded as it arrives; function calls are collected and emitted together just
/// before the stream completes.
pub struct GoogleProvider {
    client: Client,
    config: ProviderConfig,
}

impl GoogleProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_to_google_spec(messages: &[&Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(json!({"text": message.content}));
                }
                for image in &message.images {
                    match ImageRef::parse(image) {
                        ImageRef::Inline { mime_type, data } => parts.push(json!({
                            "inline_data": {"mime_type": mime_type, "data": data}
                        })),
                        ImageRef::Url(url) => {
                            tracing::warn!(url, "gemini only accepts inline images, dropping image")
                        }
                    }
                }
                if parts.is_empty() {
                    parts.push(json!({"text": ""}));
                }
                json!({"role": role, "parts": parts})
            })
            .collect()
    }

    fn tools_to_google_spec(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
        check_unique_tool_names(tools)?;
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                })
            })
            .collect();
        Ok(vec![json!({"functionDeclarations": declarations})])
    }

    fn create_request_payload(&self, messages: &[Message], tools: &[Tool]) -> ProviderResult<Value> {
        let (system, turns) = split_system(messages);
        let mut payload = json!({
            "contents": Self::messages_to_google_spec(&turns),
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_tokens,
            },
        });

        if let Some(system) = system {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            payload["tools"] = json!(Self::tools_to_google_spec(tools)?);
        }
        Ok(payload)
    }

    fn get_usage(data: &Value) -> Option<Usage> {
        let metadata = data.get("usageMetadata")?;
        let input_tokens = metadata.get("promptTokenCount").and_then(Value::as_u64)? as u32;
        let output_tokens = metadata
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u32;

        let mut usage = Usage::new(input_tokens, output_tokens);
        if let Some(total) = metadata.get("totalTokenCount").and_then(Value::as_u64) {
            usage.total_tokens = total as u32;
        }
        Some(usage)
    }

    fn check_error(data: &Value) -> ProviderResult<()> {
        match data.get("error") {
            Some(error) => Err(check_context_length_error(error).unwrap_or_else(|| {
                ProviderError::InvalidResponse(format!("API error: {}", error))
            })),
            None => Ok(()),
        }
    }

    /// Split one candidate snapshot into its text, recording function calls
    fn read_snapshot(data: &Value, accumulator: &mut ToolCallAccumulator) -> String {
        let mut text = String::new();
        let parts = data["candidates"][0]["content"]["parts"].as_array();
        for part in parts.into_iter().flatten() {
            if let Some(fragment) = part.get("text").and_then(Value::as_str) {
                text.push_str(fragment);
            } else if let Some(call) = part.get("functionCall") {
                let id = generate_call_id();
                let name = call["name"].as_str().unwrap_or_default();
                let arguments = call["args"].as_object().cloned().unwrap_or_default();
                accumulator.complete_with(CallKey::id(&id), name, arguments);
            }
        }
        text
    }

    async fn post(&self, action: &str, payload: &Value) -> ProviderResult<Response> {
        let url = self
            .config
            .url(&format!("v1beta/models/{}:{}", self.config.model, action));
        tracing::debug!(%url, "sending google request");

        send_checked(
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.config.api_key)
                .json(payload),
        )
        .await
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    async fn chat(&self, messages: &[Message], tools: &[Tool]) -> ProviderResult<AIResponse> {
        let payload = self.create_request_payload(messages, tools)?;
        let response: Value = self.post("generateContent", &payload).await?.json().await?;
        Self::check_error(&response)?;
        if response.get("candidates").is_none() {
            return Err(ProviderError::InvalidResponse(
                "No candidates in response".to_string(),
            ));
        }

        let mut accumulator = ToolCallAccumulator::new();
        let content = Self::read_snapshot(&response, &mut accumulator);
        Ok(AIResponse::new(content, &self.config.model)
            .with_tool_calls(accumulator.finish_all())
            .with_usage(Self::get_usage(&response)))
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        chunks: ChunkSender,
    ) -> ProviderResult<AIResponse> {
        let payload = self.create_request_payload(messages, tools)?;
        let response = self
            .post("streamGenerateContent?alt=sse", &payload)
            .await?;

        let mut events = sse_events(response);
        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut usage = None;

        while let Some(event) = events.next().await {
            let event = event?;
            if event.data.trim().is_empty() {
                continue;
            }
            let data = parse_event(&event.data)?;
            Self::check_error(&data)?;

            let text = Self::read_snapshot(&data, &mut accumulator);
            content.push_str(&text);
            chunks.content(text).await;
            if let Some(reported) = Self::get_usage(&data) {
                usage = Some(reported);
            }
        }

        let tool_calls = accumulator.finish_all();
        for call in &tool_calls {
            chunks.tool_call(call.clone()).await;
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
        "Google"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::response::StreamChunk;
    use crate::providers::configs::{ProviderId, ProviderSettings};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> GoogleProvider {
        let config = ProviderSettings {
            api_key: Some("g-key".to_string()),
            model: Some("gemini-1.5-flash".to_string()),
            base_url: Some(server.uri()),
            ..Default::default()
        }
        .resolve(ProviderId::Google)
        .unwrap();
        GoogleProvider::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_chat_text_and_function_call() -> anyhow::Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(json!({
                "systemInstruction": {"parts": [{"text": "Be terse."}]},
                "contents": [{"role": "user", "parts": [{"text": "weather?"}]}],
                "generationConfig": {"maxOutputTokens": 8192}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            {"text": "Checking."},
                            {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}},
                            {"functionCall": {"name": "get_weather", "args": {"city": "Rome"}}}
                        ]
                    }
                }],
                "usageMetadata": {"promptTokenCount": 11, "candidatesTokenCount": 6, "totalTokenCount": 17}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server);
        let messages = vec![Message::system("Be terse."), Message::user("weather?")];
        let response = provider.chat(&messages, &[]).await?;

        assert_eq!(response.content, "Checking.");
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[1].arguments["city"], "Rome");
        assert_ne!(response.tool_calls[0].id, response.tool_calls[1].id);
        assert_eq!(response.usage, Some(Usage::new(11, 6)));
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_defers_function_calls() -> anyhow::Result<()> {
        let body = [
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Let me "}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"functionCall": {"name": "list_files", "args": {}}}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "look."}]}}],
                   "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3, "totalTokenCount": 7}}),
        ]
        .iter()
        .map(|event| format!("data: {}\r\n\r\n", event))
        .collect::<String>();

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server);
        let (sender, mut rx) = ChunkSender::channel();
        let messages = [Message::user("ls")];
        let (response, chunks) = tokio::join!(
            provider.chat_stream(&messages, &[], sender),
            async {
                let mut chunks = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    chunks.push(chunk);
                }
                chunks
            }
        );
        let response = response?;

        assert_eq!(response.content, "Let me look.");
        assert_eq!(response.tool_calls.len(), 1);
        assert!(response.tool_calls[0].id.starts_with("call_"));
        assert_eq!(response.usage, Some(Usage::new(4, 3)));

        // text first, then the deferred call, then done
        assert_eq!(chunks.len(), 4);
        assert!(matches!(chunks[0], StreamChunk::Content { .. }));
        assert!(matches!(chunks[1], StreamChunk::Content { .. }));
        assert!(matches!(chunks[2], StreamChunk::ToolCall { .. }));
        assert_eq!(chunks[3], StreamChunk::Done);
        Ok(())
    }

    #[test]
    fn test_url_images_are_dropped() {
        let message = Message::user("see")
            .with_image("https://example.com/cat.png")
            .with_image("data:image/png;base64,iVBO");
        let spec = GoogleProvider::messages_to_google_spec(&[&message]);

        let parts = spec[0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
    }

    #[test]
    fn test_image_only_message_has_no_text_part() {
        let message = Message::user("").with_image("data:image/png;base64,iVBO");
        let empty = Message::assistant("");
        let spec = GoogleProvider::messages_to_google_spec(&[&message, &empty]);

        let parts = spec[0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].get("text").is_none());
        assert_eq!(parts[0]["inline_data"]["data"], "iVBO");
        assert_eq!(spec[1]["parts"], json!([{"text": ""}]));
    }

    #[tokio::test]
    async fn test_forbidden() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server);
        let err = provider.chat(&[Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthFailure(_)));
    }
}
