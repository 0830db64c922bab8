use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use too::agent::Agent;
use too::providers::configs::ProviderId;
use too::providers::factory::ProviderFactory;
use tracing_subscriber::EnvFilter;

mod profile;
mod render;
mod session;
mod tools;

use profile::{apply_overrides, load_profile};
use session::Session;
use tools::{catalog, FileTools};

const SYSTEM_PROMPT: &str = "You are too, a coding assistant working in the user's current directory. \
Use the file tools to read, write and list files when the request needs them, and keep answers short.";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file to read instead of ~/.config/too/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Provider to use (anthropic, openai, google, openrouter or ollama)
    #[arg(short, long)]
    provider: Option<ProviderId>,

    /// Model to use instead of the configured one
    #[arg(short, long)]
    model: Option<String>,

    /// Send a single message and exit
    #[arg(long)]
    message: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List the supported providers and whether each is configured
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    let mut profile = load_profile(cli.config.as_deref())?;
    apply_overrides(&mut profile, cli.provider, cli.model);
    let factory = ProviderFactory::new(profile);

    if let Some(Command::Providers) = cli.command {
        list_providers(&factory);
        return Ok(());
    }

    let provider = factory
        .create(None)
        .with_context(|| format!("Could not start provider '{}'", factory.profile().provider))?;
    let root = std::env::current_dir().context("Could not read the working directory")?;
    let agent = Agent::new(provider, Box::new(FileTools::new(root)), catalog())
        .with_system_prompt(SYSTEM_PROMPT);

    let session = Session::new(agent);
    match cli.message {
        Some(message) => session.headless(&message).await,
        None => session.start().await,
    }
}

fn list_providers(factory: &ProviderFactory) {
    let active = factory.profile().provider;
    for id in factory.supported_providers() {
        let status = if factory.is_configured(id) {
            style("configured").green()
        } else {
            style("not configured").dim()
        };
        let marker = if id == active { "*" } else { " " };
        println!("{} {:<12} {:<28} {}", marker, id.to_string(), id.default_model(), status);
    }
}
