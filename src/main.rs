use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogFormat, LoggingConfig, TollgateConfig};

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Rate limiting, retry and caching for upstream calls")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and print the effective settings
    Check {
        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
    /// Print the backoff delays the retry policy produces
    Schedule,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = TollgateConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!("Tollgate {}", env!("CARGO_PKG_VERSION"));
    debug!(path = ?cli.config, "Configuration loaded");

    match cli.command {
        Command::Check { json } => {
            let rendered = if json {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{}", rendered);
        }
        Command::Schedule => {
            let policy = &config.retry;
            for (i, delay) in policy.schedule().iter().enumerate() {
                println!("attempt {} failed -> wait {} ms", i + 1, delay.as_millis());
            }
            println!(
                "{} attempt(s), {} ms total backoff",
                policy.effective_attempts(),
                policy.total_delay().as_millis()
            );
        }
    }

    Ok(())
}

/// Log to stderr so command output on stdout stays machine-readable.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
