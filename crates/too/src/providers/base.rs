use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::ProviderResult;
use crate::models::message::Message;
use crate::models::response::{AIResponse, StreamChunk};
use crate::models::tool::{Tool, ToolCall};

/// Capacity of the chunk channel between a provider and its consumer
pub const CHUNK_BUFFER: usize = 64;

/// The producing half of a streamed reply
///
/// Chunks are delivered in arrival order. `done` consumes the sender, so the terminal chunk
/// is sent at most once and nothing can follow it. If the provider fails the sender is
/// dropped without `Done` and the receiver sees the channel close.
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::Sender<StreamChunk>,
}

impl ChunkSender {
    pub fn new(tx: mpsc::Sender<StreamChunk>) -> Self {
        Self { tx }
    }

    /// Create a bounded sender/receiver pair
    pub fn channel() -> (Self, mpsc::Receiver<StreamChunk>) {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        (Self::new(tx), rx)
    }

    pub async fn content<S: Into<String>>(&self, content: S) {
        let content = content.into();
        if content.is_empty() {
            return;
        }
        self.send(StreamChunk::Content { content }).await;
    }

    pub async fn tool_call(&self, tool_call: ToolCall) {
        self.send(StreamChunk::ToolCall { tool_call }).await;
    }

    pub async fn done(self) {
        self.send(StreamChunk::Done).await;
    }

    async fn send(&self, chunk: StreamChunk) {
        // A consumer that stopped listening does not fail the reply
        if self.tx.send(chunk).await.is_err() {
            tracing::debug!("stream consumer dropped, discarding chunk");
        }
    }
}

/// Base trait for AI providers (OpenAI, Anthropic, etc)
///
/// Providers hold no state across calls. Each call opens exactly one request to the vendor
/// and does not retry.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send the conversation and wait for the whole reply
    async fn chat(&self, messages: &[Message], tools: &[Tool]) -> ProviderResult<AIResponse>;

    /// Send the conversation and push the reply into `chunks` as it arrives
    ///
    /// The returned response carries the same content and tool calls as the chunks.
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        chunks: ChunkSender,
    ) -> ProviderResult<AIResponse>;

    fn model(&self) -> &str;

    fn provider_name(&self) -> &str;
}
