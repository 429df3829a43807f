//! Assistant relay CLI binary.
//!
//! # Commands
//!
//! - `serve` - Start the relay HTTP server
//! - `chat` - Interactive conversation through a running relay
//! - `assistant` - Create an assistant or replace its instructions

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use relay::{
    AssistantAdmin, AssistantRequest, Config, ConversationClient, ProxyServer, UpstreamAdapter,
    VERSION,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "relay")]
#[command(version = VERSION)]
#[command(about = "Assistant relay - protocol-normalizing proxy for hosted assistants", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay HTTP server
    Serve {
        /// Config file path (default: <config dir>/assistant-relay/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Upstream data-plane host URL
        #[arg(short, long)]
        upstream: Option<String>,

        /// API key for upstream (or use env RELAY_API_KEY / PINECONE_API_KEY)
        #[arg(short = 'k', long)]
        api_key: Option<String>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Emit logs as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Chat with an assistant through a running relay
    Chat {
        /// Relay proxy endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:3000/api/proxy")]
        endpoint: String,

        /// Upstream path of the assistant's chat route
        #[arg(short, long, default_value = "assistant/chat/icp-pulse-assistant")]
        assistant_path: String,

        /// Ask for an event-stream reply
        #[arg(short, long)]
        stream: bool,

        /// Round-trip budget per turn in seconds
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// Manage assistants on the upstream
    Assistant {
        #[command(subcommand)]
        action: AssistantAction,

        /// Config file path
        #[arg(short, long, global = true)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AssistantAction {
    /// Create a new assistant
    Create {
        /// Assistant name
        #[arg(short, long)]
        name: String,

        /// Instruction text
        #[arg(short, long)]
        instructions: String,
    },

    /// Replace an assistant's instructions
    Update {
        /// Assistant name
        #[arg(short, long)]
        name: String,

        /// Instruction text
        #[arg(short, long)]
        instructions: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            upstream,
            api_key,
            verbose,
            json_logs,
        } => cmd_serve(config, host, port, upstream, api_key, verbose, json_logs),

        Commands::Chat {
            endpoint,
            assistant_path,
            stream,
            timeout,
        } => cmd_chat(endpoint, assistant_path, stream, timeout),

        Commands::Assistant { action, config } => cmd_assistant(action, config),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// File (explicit or default location, if present), then environment.
fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => match Config::default_path().filter(|p| p.exists()) {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        },
    };
    Ok(config.with_env(|key| std::env::var(key).ok()))
}

fn cmd_serve(
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    upstream: Option<String>,
    api_key: Option<String>,
    verbose: bool,
    json_logs: bool,
) -> anyhow::Result<()> {
    init_logging(verbose, json_logs);

    let mut config = load_config(config)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if upstream.is_some() {
        config.upstream.host = upstream;
    }
    if api_key.is_some() {
        config.upstream.api_key = api_key;
    }

    let server = ProxyServer::new(config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async { server.run().await.map_err(|e| anyhow::anyhow!("{}", e)) })
}

fn cmd_chat(endpoint: String, assistant_path: String, stream: bool, timeout: u64) -> anyhow::Result<()> {
    init_logging(false, false);

    let mut client = ConversationClient::new(endpoint, assistant_path)
        .with_streaming(stream)
        .with_timeout(Duration::from_secs(timeout));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        println!("Type a message and press Enter. Ctrl-D to quit.");
        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match client.send(line).await {
                Ok(answer) => println!("{answer}\n"),
                Err(e) => eprintln!("Error: {e}\n"),
            }
        }

        Ok(())
    })
}

fn cmd_assistant(action: AssistantAction, config: Option<PathBuf>) -> anyhow::Result<()> {
    init_logging(false, false);

    let config = load_config(config)?;
    let adapter = UpstreamAdapter::new(config.upstream.connection()?)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let admin = AssistantAdmin::new(&adapter);
        let output = match action {
            AssistantAction::Create { name, instructions } => {
                let request = AssistantRequest {
                    assistant_name: Some(name),
                    instructions: Some(instructions),
                };
                admin.create(&request).await?
            },
            AssistantAction::Update { name, instructions } => {
                let request = AssistantRequest {
                    assistant_name: Some(name),
                    instructions: Some(instructions),
                };
                serde_json::to_value(admin.update_instructions(&request).await?)?
            },
        };

        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    })
}
