//! aisbot binary: gateway mode and a direct agent mode.

mod repl;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::AsyncBufReadExt;
use tracing::info;

use aisbot_core::bus::envelope::InboundMessage;
use aisbot_core::bus::factory::BusFactory;
use aisbot_core::bus::provider::OutboundCallback;
use aisbot_core::bus::queue::MessageBus;
use aisbot_core::config::{load_config, Config};
use aisbot_agent::agent_loop::{AgentLoop, AgentSettings};
use aisbot_providers::create_provider;

#[derive(Parser)]
#[command(name = "aisbot", version, about = "Multi-channel AI agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway: bus, outbound dispatcher, and agent loop.
    Run {
        /// Config file path (default: ./config.yaml, then ~/.aisbot/config.yaml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Talk to the agent directly: one-shot with -m, interactive otherwise.
    Agent {
        /// Send one message and print the reply.
        #[arg(short, long)]
        message: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => cmd_run(config.as_deref()).await,
        Command::Agent { message, config } => cmd_agent(message, config.as_deref()).await,
    }
}

/// Log level comes from `AISBOT_LOG` (default `info`).
fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_env("AISBOT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Wire up provider, settings, and MCP discovery.
async fn build_agent(config: &Config, bus: Arc<MessageBus>) -> anyhow::Result<AgentLoop> {
    let provider = create_provider(&config.agents.defaults.model, &config.providers.to_map())?;
    let settings = AgentSettings::from_config(config);
    std::fs::create_dir_all(&settings.workspace)?;

    let mut agent = AgentLoop::new(bus, provider, settings)?;
    agent.initialize().await?;
    Ok(agent)
}

/// Gateway: the agent loop and dispatcher run as tasks; stdin feeds the
/// `cli` channel and replies to it print here.
async fn cmd_run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let bus_provider = BusFactory::create(&config.bus)?;
    let bus = Arc::new(MessageBus::new(bus_provider));
    bus.initialize().await?;

    let agent = Arc::new(build_agent(&config, bus.clone()).await?);

    let print_reply: OutboundCallback = Arc::new(|msg| {
        Box::pin(async move {
            println!("{} {}", "aisbot>".green().bold(), msg.content);
            Ok(())
        })
    });
    bus.subscribe_outbound("cli", print_reply);

    let dispatcher = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.dispatch_outbound().await })
    };
    let runner = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.run().await })
    };
    info!(bus = %config.bus.provider, "gateway running");

    println!(
        "{}",
        "aisbot gateway running — type a message, Ctrl-D to exit".dimmed()
    );
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        bus.publish_inbound(InboundMessage::new("cli", "user", "gateway", line))
            .await?;
    }

    agent.stop();
    bus.stop();
    let _ = runner.await;
    let _ = dispatcher.await;
    Ok(())
}

/// Direct mode: no dispatcher, the reply comes back inline.
async fn cmd_agent(message: Option<String>, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let bus_provider = BusFactory::create(&config.bus)?;
    let bus = Arc::new(MessageBus::new(bus_provider));
    bus.initialize().await?;

    let agent = build_agent(&config, bus).await?;

    match message {
        Some(text) => {
            let reply = agent.process_direct(&text).await?;
            println!("{reply}");
            Ok(())
        }
        None => repl::run_repl(&agent).await,
    }
}
