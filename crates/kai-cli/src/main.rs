use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use kai_core::config::{Config, LoggingConfig};
use kai_gateway::{GatewayState, start_gateway};

#[derive(Parser)]
#[command(
    name = "kai-assist",
    about = "AI phone support agent: relays telephony media streams to a realtime speech model",
    version
)]
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
    /// Start the voice gateway
    Serve {
        /// Port to listen on (default: 5050)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show gateway status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    let mut directives = vec![level];
    if let Some(l) = logging {
        directives.extend(l.filters.iter().cloned());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));

    let writer = match logging.map(|l| l.output.as_str()) {
        Some("stdout") => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    match logging.map(|l| l.format.as_str()) {
        Some("json") => builder.json().init(),
        _ => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.server_port());
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("invalid configuration ({} error(s))", errors.len());
            }

            let state = GatewayState::from_config(Arc::new(config))?;
            #[cfg(feature = "metrics")]
            let state = {
                let handle = kai_gateway::metrics::install_prometheus_recorder()?;
                state.with_prometheus(handle)
            };

            tracing::info!("Starting KAI Assist on port {port}");
            start_gateway(Arc::new(state), port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    std::process::exit(1);
                }
                println!("Configuration OK ({})", config_path.display());
            }
        },
        Commands::Status => {
            println!("KAI Assist v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Port: {}", config.server_port());
            println!("Realtime model: {}", config.realtime().model);
            let url = format!("http://127.0.0.1:{}/health", config.server_port());
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()?;
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let health: serde_json::Value = resp.json().await?;
                    println!("Status: running");
                    println!("Active calls: {}", health["active_calls"]);
                }
                _ => println!("Status: not running"),
            }
        }
    }

    Ok(())
}
