use anyhow::Result;
use console::style;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use too::agent::{Agent, AgentEvent};
use too::errors::AgentError;

use crate::render::{print_error, print_usage, render_event};

const PROMPT: &str = "\x1b[1m\x1b[38;5;30mtoo> \x1b[0m";

/// A line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Clear,
    Usage,
    Help,
    Exit,
    Empty,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        match line.to_ascii_lowercase().as_str() {
            "/exit" | "/quit" => Input::Exit,
            "/clear" => Input::Clear,
            "/usage" => Input::Usage,
            "/help" | "/?" => Input::Help,
            _ => Input::Message(line.to_string()),
        }
    }
}

pub struct Session {
    agent: Agent,
}

impl Session {
    pub fn new(agent: Agent) -> Self {
        Session { agent }
    }

    /// Read lines until `/exit`, end of input or interrupt
    pub async fn start(&self) -> Result<()> {
        let provider = self.agent.provider();
        println!(
            "{} {}",
            style(format!("too · {} · {}", provider.provider_name(), provider.model())).bold(),
            style("type /help for commands").dim()
        );

        let mut editor = rustyline::DefaultEditor::new()?;
        loop {
            let line = match editor.readline(PROMPT) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => {
                    print_error(&format!("input error: {}", e));
                    break;
                }
            };

            match Input::parse(&line) {
                Input::Empty => continue,
                Input::Exit => break,
                Input::Help => print_help(),
                Input::Usage => print_usage(&self.agent.total_usage()),
                Input::Clear => match self.agent.clear() {
                    Ok(()) => println!("{}", style("conversation cleared").dim()),
                    Err(e) => print_error(&e.to_string()),
                },
                Input::Message(text) => {
                    // history is a convenience, losing it is not an error
                    let _ = editor.add_history_entry(text.as_str());
                    self.turn(&text).await;
                }
            }
        }
        Ok(())
    }

    /// Run a single message and return
    pub async fn headless(&self, message: &str) -> Result<()> {
        if !self.turn(message).await {
            anyhow::bail!("the reply to the message failed");
        }
        Ok(())
    }

    /// Submit one message, printing the reply while it streams
    async fn turn(&self, text: &str) -> bool {
        let (tx, rx) = mpsc::unbounded_channel();
        let (result, ()) = tokio::join!(self.agent.submit(text, Some(tx)), render_events(rx));
        println!();

        match result {
            Ok(_) => true,
            Err(AgentError::Busy) => {
                print_error("a reply is still in progress, wait for it to finish");
                false
            }
            // already rendered from the error event
            Err(AgentError::Provider(_)) => false,
        }
    }
}

async fn render_events(mut rx: UnboundedReceiver<AgentEvent>) {
    while let Some(event) = rx.recv().await {
        render_event(&event);
    }
}

fn print_help() {
    println!("Commands:");
    println!("/exit - Exit the session");
    println!("/clear - Forget the conversation so far");
    println!("/usage - Show the tokens used this session");
    println!("/? | /help - Display this help message");
}
