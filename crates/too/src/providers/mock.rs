use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::Message;
use crate::models::response::{AIResponse, StreamChunk, Usage};
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::{ChunkSender, Provider};

/// One scripted reply of the mock provider
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    chunks: Vec<StreamChunk>,
    final_content: Option<String>,
    error: Option<String>,
}

impl MockTurn {
    pub fn new(chunks: Vec<StreamChunk>) -> Self {
        Self {
            chunks,
            ..Default::default()
        }
    }

    /// A reply of plain text delivered in the given pieces
    pub fn text(pieces: &[&str]) -> Self {
        Self::new(
            pieces
                .iter()
                .map(|piece| StreamChunk::Content {
                    content: piece.to_string(),
                })
                .collect(),
        )
    }

    pub fn tool_call(mut self, call: ToolCall) -> Self {
        self.chunks.push(StreamChunk::ToolCall { tool_call: call });
        self
    }

    /// Report different content in the final response than was streamed
    pub fn with_final_content<S: Into<String>>(mut self, content: S) -> Self {
        self.final_content = Some(content.into());
        self
    }

    /// Stream the chunks, then fail instead of completing
    pub fn failing<S: Into<String>>(mut self, message: S) -> Self {
        self.error = Some(message.into());
        self
    }
}

/// A mock provider that replays pre-configured turns for testing
pub struct MockProvider {
    turns: Arc<Mutex<Vec<MockTurn>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    gate: Option<Arc<Notify>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of turns
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns)),
            requests: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    /// Hold every reply until the gate is notified
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// The conversations the provider has been sent, in call order
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        Arc::clone(&self.requests)
    }

    async fn next_turn(&self, messages: &[Message]) -> MockTurn {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            MockTurn::default()
        } else {
            turns.remove(0)
        }
    }

    fn response(turn: &MockTurn) -> AIResponse {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for chunk in &turn.chunks {
            match chunk {
                StreamChunk::Content { content: piece } => content.push_str(piece),
                StreamChunk::ToolCall { tool_call } => tool_calls.push(tool_call.clone()),
                StreamChunk::Done => {}
            }
        }
        let content = turn.final_content.clone().unwrap_or(content);
        AIResponse::new(content, "mock-model")
            .with_tool_calls(tool_calls)
            .with_usage(Some(Usage::new(10, 5)))
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn chat(&self, messages: &[Message], _tools: &[Tool]) -> ProviderResult<AIResponse> {
        let turn = self.next_turn(messages).await;
        match &turn.error {
            Some(message) => Err(ProviderError::NetworkFailure(message.clone())),
            None => Ok(Self::response(&turn)),
        }
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        _tools: &[Tool],
        chunks: ChunkSender,
    ) -> ProviderResult<AIResponse> {
        let turn = self.next_turn(messages).await;
        for chunk in &turn.chunks {
            match chunk {
                StreamChunk::Content { content } => chunks.content(content.as_str()).await,
                StreamChunk::ToolCall { tool_call } => chunks.tool_call(tool_call.clone()).await,
                StreamChunk::Done => {}
            }
        }
        if let Some(message) = &turn.error {
            return Err(ProviderError::NetworkFailure(message.clone()));
        }
        chunks.done().await;
        Ok(Self::response(&turn))
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn provider_name(&self) -> &str {
        "Mock"
    }
}
