use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

use crate::errors::{AgentError, ProviderResult};
use crate::models::message::{Message, Role};
use crate::models::response::{AIResponse, StreamChunk, Usage};
use crate::models::tool::{Tool, ToolCall, ToolResult};
use crate::providers::base::{ChunkSender, Provider};

/// What a tool reported back to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub output: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success<S: Into<String>>(output: S) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error<S: Into<String>>(output: S) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

/// Performs the side effects a tool call names
///
/// Failures are reported through `ToolOutput::is_error` rather than returned, so one failing
/// call never prevents the calls after it from running.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> ToolOutput;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    ToolExecution,
}

/// One entry of the conversation transcript
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    Message(Message),
    ToolCall(ToolCall),
    ToolResult { name: String, result: ToolResult },
    Error(String),
}

/// Progress of a turn, for whoever is presenting it
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ContentDelta(String),
    ToolCallStarted(ToolCall),
    ToolCallFinished { name: String, result: ToolResult },
    Error(String),
}

#[derive(Debug)]
struct Session {
    state: TurnState,
    transcript: Vec<TranscriptEntry>,
    usage: Usage,
}

impl Session {
    /// Messages replayed to the provider; tool and error entries stay local
    fn history(&self) -> impl Iterator<Item = &Message> {
        self.transcript.iter().filter_map(|entry| match entry {
            TranscriptEntry::Message(message) if message.role != Role::System => Some(message),
            _ => None,
        })
    }
}

/// Resets the session to idle when a turn ends, however it ends
struct IdleGuard<'a> {
    session: &'a Mutex<Session>,
}

impl Drop for IdleGuard<'_> {
    fn drop(&mut self) {
        lock(self.session).state = TurnState::Idle;
    }
}

struct EventSink(Option<UnboundedSender<AgentEvent>>);

impl EventSink {
    fn send(&self, event: AgentEvent) {
        if let Some(tx) = &self.0 {
            // nobody listening is fine
            let _ = tx.send(event);
        }
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Agent drives one conversation: it streams each reply from the provider and runs the
/// tool calls the reply asks for
pub struct Agent {
    provider: Box<dyn Provider>,
    executor: Box<dyn ToolExecutor>,
    tools: Vec<Tool>,
    system_prompt: Option<String>,
    session: Mutex<Session>,
}

impl Agent {
    pub fn new(
        provider: Box<dyn Provider>,
        executor: Box<dyn ToolExecutor>,
        tools: Vec<Tool>,
    ) -> Self {
        Self {
            provider,
            executor,
            tools,
            system_prompt: None,
            session: Mutex::new(Session {
                state: TurnState::Idle,
                transcript: Vec::new(),
                usage: Usage::default(),
            }),
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn state(&self) -> TurnState {
        lock(&self.session).state
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        lock(&self.session).transcript.clone()
    }

    /// Tokens used by every completed turn so far
    pub fn total_usage(&self) -> Usage {
        lock(&self.session).usage
    }

    /// Forget the conversation. Only allowed between turns.
    pub fn clear(&self) -> Result<(), AgentError> {
        let mut session = lock(&self.session);
        if session.state != TurnState::Idle {
            return Err(AgentError::Busy);
        }
        session.transcript.clear();
        session.usage = Usage::default();
        Ok(())
    }

    /// Run one turn for a user submission
    ///
    /// Rejects the submission with `Busy` if a turn is already running. The reply is streamed
    /// to `events` as it arrives, then any tool calls it carries are executed one at a time
    /// in the order the provider returned them. On a provider failure the transcript keeps
    /// the user message followed by a single error entry.
    pub async fn submit(
        &self,
        input: &str,
        events: Option<UnboundedSender<AgentEvent>>,
    ) -> Result<AIResponse, AgentError> {
        let outbound = {
            let mut session = lock(&self.session);
            if session.state != TurnState::Idle {
                tracing::debug!(state = ?session.state, "rejecting submission while busy");
                return Err(AgentError::Busy);
            }
            session.state = TurnState::Streaming;

            let user = Message::user(input);
            let mut outbound: Vec<Message> = self
                .system_prompt
                .iter()
                .map(Message::system)
                .chain(session.history().cloned())
                .collect();
            outbound.push(user.clone());
            session.transcript.push(TranscriptEntry::Message(user));
            outbound
        };
        let _idle = IdleGuard {
            session: &self.session,
        };
        let events = EventSink(events);

        let response = match self.stream_reply(&outbound, &events).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, provider = self.provider.provider_name(), "turn aborted");
                lock(&self.session)
                    .transcript
                    .push(TranscriptEntry::Error(err.to_string()));
                events.send(AgentEvent::Error(err.to_string()));
                return Err(err.into());
            }
        };

        if response.has_tool_calls() {
            lock(&self.session).state = TurnState::ToolExecution;
            for call in &response.tool_calls {
                self.run_tool(call, &events).await;
            }
        }

        let mut session = lock(&self.session);
        if let Some(usage) = &response.usage {
            session.usage.accumulate(usage);
        }
        if !response.content.is_empty() {
            session
                .transcript
                .push(TranscriptEntry::Message(Message::assistant(&response.content)));
        }
        Ok(response)
    }

    /// Stream one reply, forwarding content as it arrives
    async fn stream_reply(
        &self,
        messages: &[Message],
        events: &EventSink,
    ) -> ProviderResult<AIResponse> {
        let (sender, mut rx) = ChunkSender::channel();
        let producer = self.provider.chat_stream(messages, &self.tools, sender);
        let consumer = async {
            let mut streamed = String::new();
            while let Some(chunk) = rx.recv().await {
                match chunk {
                    StreamChunk::Content { content } => {
                        streamed.push_str(&content);
                        events.send(AgentEvent::ContentDelta(content));
                    }
                    StreamChunk::ToolCall { tool_call } => {
                        tracing::debug!(id = %tool_call.id, name = %tool_call.name, "tool call received")
                    }
                    StreamChunk::Done => tracing::debug!("stream done"),
                }
            }
            streamed
        };

        let (response, streamed) = tokio::join!(producer, consumer);
        let response = response?;
        if response.content != streamed {
            tracing::debug!("final content differs from the streamed content, using the final content");
        }
        Ok(response)
    }

    async fn run_tool(&self, call: &ToolCall, events: &EventSink) {
        lock(&self.session)
            .transcript
            .push(TranscriptEntry::ToolCall(call.clone()));
        events.send(AgentEvent::ToolCallStarted(call.clone()));

        let output = self.executor.execute(&call.name, &call.arguments).await;
        let result = if output.is_error {
            tracing::warn!(id = %call.id, name = %call.name, error = %output.output, "tool call failed");
            ToolResult::error(&call.id, output.output)
        } else {
            ToolResult::success(&call.id, output.output)
        };

        lock(&self.session).transcript.push(TranscriptEntry::ToolResult {
            name: call.name.clone(),
            result: result.clone(),
        });
        events.send(AgentEvent::ToolCallFinished {
            name: call.name.clone(),
            result,
        });
    }
}
