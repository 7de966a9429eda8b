use std::sync::Arc;

use clap::{Parser, Subcommand};
use echoline_core::config::Config;
use echoline_gateway::server::start_gateway;
use echoline_gateway::state::GatewayState;

#[derive(Parser)]
#[command(name = "echoline", about = "Real-time full-duplex voice agent core", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket gateway
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration
    Show,
    /// Validate the configuration and report warnings/errors
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_dir);

    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("refusing to start with invalid configuration");
            }

            tracing::info!(port, "starting echoline gateway");
            let state = Arc::new(GatewayState::new(config));
            start_gateway(state, port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Check => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("configuration is invalid");
                }
                println!("configuration ok");
            }
        },
    }

    Ok(())
}
