use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use xmtp_engine_core::config::EngineConfig;
use xmtp_engine_core::logging::{init_logging_with_config, LogConfig, LogLevel};

mod simulate;

#[derive(Parser, Debug)]
#[command(name = "xmtp-engine")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long, global = true)]
    json_logs: bool,

    /// Configuration file (TOML); environment overrides still apply
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine against in-memory collaborators with a scripted
    /// connectivity drop and background cycle
    Simulate {
        /// Account address to register (repeatable)
        #[arg(short, long = "account", default_values_t = vec!["0xA".to_string()])]
        accounts: Vec<String>,

        /// How long to run, e.g. "4s" or "500ms"
        #[arg(short, long, default_value = "4s", value_parser = parse_duration)]
        duration: Duration,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Validate a configuration file
    Check { file: PathBuf },
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn effective_config(args: &Args) -> Result<EngineConfig> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.parse::<LogLevel>()?.to_string();
    }
    config.logging.json_format |= args.json_logs;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.command {
        Command::Config {
            action: ConfigAction::Check { file },
        } => {
            let config = EngineConfig::from_file(file).with_context(|| {
                format!("{} is not a valid engine configuration", file.display())
            })?;
            println!("{} is valid", file.display());
            print!("{}", config.to_toml()?);
        }
        Command::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", effective_config(&args)?.to_toml()?);
        }
        Command::Simulate { accounts, duration } => {
            let config = effective_config(&args)?;
            init_logging_with_config(LogConfig::try_from(&config.logging)?)?;
            info!(accounts = accounts.len(), ?duration, "Starting simulation");

            let summary = simulate::run(config, accounts, *duration).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
