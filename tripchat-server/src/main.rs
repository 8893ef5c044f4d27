mod server;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tripchat::{ChatClient, ChatConfig};

#[derive(Parser)]
#[command(name = "tripchat-server", version, about = "Travel assistant AI server")]
struct Cli {
    /// Config file (default: ~/.tripchat/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Send one prompt upstream and print the reply
    Ask {
        prompt: String,

        /// Model to use instead of the configured default
        #[arg(short, long)]
        model: Option<String>,

        /// Print the reply as it streams in
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripchat_server=info,tripchat=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(ChatConfig::default_path);
    let config = ChatConfig::load(&config_path)?;

    match cli.command {
        Commands::Serve { port, host } => {
            server::run_server(&host, port, &config).await?;
        }
        Commands::Ask {
            prompt,
            model,
            stream,
        } => {
            ask(&config, &prompt, model.as_deref(), stream).await?;
        }
    }

    Ok(())
}

async fn ask(
    config: &ChatConfig,
    prompt: &str,
    model: Option<&str>,
    stream: bool,
) -> anyhow::Result<()> {
    let client = ChatClient::from_config(config)?;

    if !stream {
        let resp = client.complete(prompt, model).await?;
        println!("{}", resp.content);
        return Ok(());
    }

    let mut chunks = client.complete_streaming(prompt, model).await?;
    let mut out = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        write!(out, "{}", chunk?.delta_text)?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}
