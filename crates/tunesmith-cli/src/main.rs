mod prompt;
mod session;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use console::style;
use tunesmith::agent::{Agent, DEFAULT_MAX_TURNS, DEFAULT_TOOL_TIMEOUT};
use tunesmith::credentials::{CheckOutcome, CredentialValidator, GROQ_API_KEY};
use tunesmith::policy::{ConversationPolicy, DEFAULT_PLAYLIST_SIZE, MAX_PLAYLIST_SIZE};
use tunesmith::providers::configs::{OpenAiProviderConfig, GROQ_HOST, GROQ_MODEL};
use tunesmith::providers::openai::OpenAiProvider;
use tunesmith::registry::ToolRegistry;
use tunesmith::systems::ToolProvidersConfig;
use tracing_subscriber::EnvFilter;

use crate::prompt::rustyline::RustylinePrompt;
use crate::session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive playlist conversation (the default)
    Chat(ChatArgs),

    /// Check that the Spotify and Groq credentials are present and accepted
    Check,
}

#[derive(Args, Clone)]
struct ChatArgs {
    /// YAML file listing the MCP servers that provide tools
    #[arg(
        long,
        value_name = "FILE",
        default_value = "tool_providers.yaml",
        env = "TUNESMITH_TOOL_PROVIDERS"
    )]
    tool_providers: PathBuf,

    /// Replace the built-in conversation policy with a template file
    #[arg(long, value_name = "FILE")]
    policy_file: Option<PathBuf>,

    #[arg(long, env = GROQ_API_KEY, hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = GROQ_HOST)]
    host: String,

    #[arg(long, env = "GROQ_MODEL", default_value = GROQ_MODEL)]
    model: String,

    /// Reasoning steps allowed before a reply is abandoned
    #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
    max_turns: usize,

    /// Seconds a single tool call may run
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TOOL_TIMEOUT.as_secs())]
    tool_timeout: u64,

    #[arg(long, default_value_t = DEFAULT_PLAYLIST_SIZE)]
    playlist_size: usize,

    #[arg(long, default_value_t = MAX_PLAYLIST_SIZE)]
    max_playlist_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Check) => {
            if !check().await? {
                process::exit(1);
            }
        }
        Some(Command::Chat(args)) => chat(args).await?,
        None => chat(cli.chat).await?,
    }
    Ok(())
}

async fn check() -> Result<bool> {
    let report = CredentialValidator::new()?.check_env().await;
    print_outcome("Spotify", &report.spotify);
    print_outcome("Groq", &report.groq);
    Ok(report.all_valid())
}

fn print_outcome(integration: &str, outcome: &CheckOutcome) {
    let status = if outcome.is_valid() {
        style(outcome.to_string()).green()
    } else {
        style(outcome.to_string()).red()
    };
    println!("{}: {}", style(integration).bold(), status);
}

async fn chat(args: ChatArgs) -> Result<()> {
    let spin = cliclack::spinner();
    spin.start("connecting tool providers...");
    let agent = match build_agent(&args).await {
        Ok(agent) => {
            spin.stop("connected");
            agent
        }
        Err(e) => {
            spin.error(e.to_string());
            return Err(e);
        }
    };

    let prompt = RustylinePrompt::new()?;
    let mut session = Session::new(agent, Box::new(prompt));
    session.start().await
}

async fn build_agent(args: &ChatArgs) -> Result<Agent> {
    let api_key = args
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} is not set", GROQ_API_KEY))?;
    let provider = OpenAiProvider::new(
        OpenAiProviderConfig::groq(api_key)
            .with_host(&args.host)
            .with_model(&args.model),
    )?;

    let providers = ToolProvidersConfig::load(&args.tool_providers)?;
    let registry = ToolRegistry::connect(&providers).await?;

    let policy = match &args.policy_file {
        Some(path) => ConversationPolicy::from_file(path)?,
        None => ConversationPolicy::new(),
    }
    .with_playlist_sizes(args.playlist_size, args.max_playlist_size);

    Ok(Agent::new(Box::new(provider), registry)
        .with_policy(policy)
        .with_max_turns(args.max_turns)
        .with_tool_timeout(Duration::from_secs(args.tool_timeout)))
}
