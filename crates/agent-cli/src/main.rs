//! mcp-chat
//!
//! Connects to an MCP tool server, then answers queries from stdin until
//! `quit` or end of input.

mod config;

use std::sync::Arc;

use agent_core::{ChatSession, LoopConfig, ResolutionLoopBuilder, ToolCatalog};
use agent_runtime::{AnthropicConfig, AnthropicProvider, McpClient, McpServerConfig};
use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they never interleave with the chat on stdout
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "warn,agent_core=info,agent_runtime=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let anthropic = AnthropicConfig::from_env()?;
    let loop_config = cli.loop_config(&anthropic);
    let provider = Arc::new(AnthropicProvider::from_config(anthropic)?);

    let server = McpServerConfig::from_script(&cli.server)?;
    let tools = Arc::new(McpClient::connect(server).await?);

    let result = run(&cli, provider, loop_config, &tools).await;
    tools.shutdown().await;
    result
}

async fn run(
    cli: &Cli,
    provider: Arc<AnthropicProvider>,
    loop_config: LoopConfig,
    tools: &Arc<McpClient>,
) -> anyhow::Result<()> {
    let names: Vec<String> = tools
        .list_tools()
        .await?
        .into_iter()
        .map(|tool| tool.name)
        .collect();
    println!("\nConnected to server '{}' with tools: {names:?}", tools.server_name());
    tracing::info!(model = %loop_config.generation.model, "using model");

    let agent = ResolutionLoopBuilder::new()
        .completion(provider)
        .tools(Arc::clone(tools))
        .config(loop_config)
        .build()?;

    let mut session = ChatSession::new(agent, cli.session_config());
    let summary = session
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    tracing::info!(answered = summary.answered, failed = summary.failed, "goodbye");
    Ok(())
}
