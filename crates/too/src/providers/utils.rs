use std::collections::HashSet;
use std::io;

use bytes::Bytes;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::{RequestBuilder, Response};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, Lines};
use tokio_util::io::StreamReader;

use super::accumulator::parse_arguments;
use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::{split_system, Message, Role};
use crate::models::response::{AIResponse, Usage};
use crate::models::tool::{Tool, ToolCall};

/// Generate an id for vendors that do not assign one to their tool calls
pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Tool names must be unique before they reach a vendor
pub fn check_unique_tool_names(tools: &[Tool]) -> ProviderResult<()> {
    let mut tool_names = HashSet::new();
    for tool in tools {
        if !tool_names.insert(tool.name.as_str()) {
            return Err(ProviderError::InvalidRequest(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }
    }
    Ok(())
}

/// Send a request and map any non-success status onto the error taxonomy
pub async fn send_checked(request: RequestBuilder) -> ProviderResult<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!(%status, %body, "provider request failed");
    if let Ok(value) = serde_json::from_str::<Value>(&body) {
        if let Some(err) = value.get("error").and_then(check_context_length_error) {
            return Err(err);
        }
    }
    Err(ProviderError::from_status(status, body))
}

/// Recognize the error payloads vendors use for an exceeded context window
pub fn check_context_length_error(error: &Value) -> Option<ProviderError> {
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown error");
    let code = error.get("code").and_then(|c| c.as_str()).unwrap_or_default();
    if code == "context_length_exceeded"
        || code == "string_above_max_length"
        || message.contains("prompt is too long")
    {
        Some(ProviderError::ContextLengthExceeded(message.to_string()))
    } else {
        None
    }
}

/// Decode a response body as server sent events
pub fn sse_events(response: Response) -> BoxStream<'static, ProviderResult<Event>> {
    response
        .bytes_stream()
        .eventsource()
        .map(|event| {
            event.map_err(|err| match err {
                EventStreamError::Transport(err) => ProviderError::from(err),
                other => ProviderError::InvalidResponse(other.to_string()),
            })
        })
        .boxed()
}

pub type NdjsonLines = Lines<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>>;

/// Decode a response body as newline delimited json, one document per line
pub fn ndjson_lines(response: Response) -> NdjsonLines {
    let body = response
        .bytes_stream()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
        .boxed();
    StreamReader::new(body).lines()
}

/// Parse one streamed document
pub fn parse_event(data: &str) -> ProviderResult<Value> {
    serde_json::from_str(data)
        .map_err(|e| ProviderError::InvalidResponse(format!("Could not decode stream event: {}", e)))
}

/// Convert internal messages to the openai chat completion message specification
///
/// System messages are merged into one leading system message. Images become `image_url`
/// content parts; data urls are passed through as urls, which openai compatible endpoints
/// accept.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let (system, turns) = split_system(messages);
    let mut spec = Vec::with_capacity(turns.len() + 1);
    if let Some(system) = system {
        spec.push(json!({"role": "system", "content": system}));
    }

    for message in turns {
        if message.images.is_empty() || message.role != Role::User {
            spec.push(json!({
                "role": message.role.as_str(),
                "content": message.content,
            }));
            continue;
        }

        let mut parts = vec![json!({"type": "text", "text": message.content})];
        parts.extend(message.images.iter().map(|image| {
            json!({
                "type": "image_url",
                "image_url": {"url": image}
            })
        }));
        spec.push(json!({
            "role": message.role.as_str(),
            "content": parts,
        }));
    }
    spec
}

/// Convert internal Tool format to the openai tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
    check_unique_tool_names(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect())
}

/// Read openai style token accounting, if the payload carries it
pub fn openai_usage(data: &Value) -> Option<Usage> {
    let usage = data.get("usage").filter(|u| u.is_object())?;
    let input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64)? as u32;
    let output_tokens = usage
        .get("completion_tokens")
        .and_then(Value::as_u64)
        .unwrap_or_default() as u32;

    let mut parsed = Usage::new(input_tokens, output_tokens);
    if let Some(total) = usage.get("total_tokens").and_then(Value::as_u64) {
        parsed.total_tokens = total as u32;
    }
    Some(parsed)
}

/// Convert an openai chat completion response into a materialized response
pub fn openai_response_to_response(response: &Value, model: &str) -> ProviderResult<AIResponse> {
    if let Some(error) = response.get("error") {
        return Err(check_context_length_error(error)
            .unwrap_or_else(|| ProviderError::InvalidResponse(format!("API error: {}", error))));
    }

    let message = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(generate_call_id);
            let function = &call["function"];
            let name = function["name"].as_str().unwrap_or_default();
            if name.is_empty() {
                return Err(ProviderError::InvalidResponse(format!(
                    "Tool call {} has no function name",
                    id
                )));
            }
            let arguments = match &function["arguments"] {
                Value::String(text) => parse_arguments(&id, text),
                Value::Object(arguments) => arguments.clone(),
                _ => Default::default(),
            };
            tool_calls.push(ToolCall::new(id, name, arguments));
        }
    }

    Ok(AIResponse::new(content, model)
        .with_tool_calls(tool_calls)
        .with_usage(openai_usage(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_messages_to_openai_spec() {
        let messages = vec![
            Message::system("Be brief."),
            Message::user("Hello"),
            Message::assistant("Hi!"),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 3);
        assert_eq!(spec[0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(spec[1]["content"], "Hello");
        assert_eq!(spec[2]["role"], "assistant");
    }

    #[test]
    fn test_messages_to_openai_spec_merges_system() {
        let messages = vec![
            Message::user("Hello"),
            Message::system("Be brief."),
            Message::system("Be kind."),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0], json!({"role": "system", "content": "Be brief.\n\nBe kind."}));
        assert_eq!(spec[1]["role"], "user");
    }

    #[test]
    fn test_messages_to_openai_spec_with_image() {
        let message = Message::user("What is this?").with_image("data:image/png;base64,AAAA");
        let spec = messages_to_openai_spec(&[message]);

        assert_eq!(spec[0]["content"][0], json!({"type": "text", "text": "What is this?"}));
        assert_eq!(
            spec[0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn test_tools_to_openai_spec() {
        let tool = Tool::new(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "Test parameter"
                    }
                },
                "required": ["input"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool]).unwrap();
        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
        assert_eq!(spec[0]["function"]["parameters"]["required"][0], "input");
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tool = Tool::new("test_tool", "Test tool", json!({"type": "object"}));
        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate tool name"));
    }

    #[test]
    fn test_tools_to_openai_spec_empty() {
        assert!(tools_to_openai_spec(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_openai_response_to_response_text() {
        let response = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Hello from the model!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 25, "total_tokens": 35}
        });

        let parsed = openai_response_to_response(&response, "gpt-4o").unwrap();
        assert_eq!(parsed.content, "Hello from the model!");
        assert_eq!(parsed.model, "gpt-4o");
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.usage, Some(Usage::new(10, 25)));
    }

    #[test]
    fn test_openai_response_to_response_tool_calls() {
        let response = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "1", "function": {"name": "example_fn", "arguments": "{\"param\": \"value\"}"}},
                        {"id": "2", "function": {"name": "broken_fn", "arguments": "{invalid"}}
                    ]
                }
            }]
        });

        let parsed = openai_response_to_response(&response, "gpt-4o").unwrap();
        assert_eq!(parsed.content, "");
        assert_eq!(parsed.tool_calls.len(), 2);
        assert_eq!(parsed.tool_calls[0].name, "example_fn");
        assert_eq!(parsed.tool_calls[0].arguments["param"], "value");
        assert!(parsed.tool_calls[1].arguments.is_empty());
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_openai_response_without_choices() {
        let err = openai_response_to_response(&json!({"id": "x"}), "gpt-4o").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn test_check_context_length_error() {
        let error = json!({"code": "context_length_exceeded", "message": "too many tokens"});
        assert!(matches!(
            check_context_length_error(&error),
            Some(ProviderError::ContextLengthExceeded(_))
        ));

        let anthropic = json!({"type": "invalid_request_error", "message": "prompt is too long: 210000 tokens"});
        assert!(check_context_length_error(&anthropic).is_some());

        let other = json!({"code": "invalid_api_key", "message": "bad key"});
        assert!(check_context_length_error(&other).is_none());
    }

    #[test]
    fn test_generate_call_id_unique() {
        let a = generate_call_id();
        let b = generate_call_id();
        assert!(a.starts_with("call_"));
        assert_ne!(a, b);
    }
}
