use clap::{Parser, Subcommand};
use lib::status::LogStatusSink;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mysgw")]
#[command(about = "MySensors gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the gateway: bridge the configured device transport (mqtt, net or
    /// serial) to the controller REST API.
    Gateway {
        /// Config file path (default: MYSGW_CONFIG_PATH or ~/.mysgw/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Print the effective configuration as JSON and exit.
    Config {
        /// Config file path (default: MYSGW_CONFIG_PATH or ~/.mysgw/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("mysgw {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Gateway { config }) => {
            if let Err(e) = run_gateway(config).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Config { config }) => {
            if let Err(e) = show_config(config) {
                log::error!("config failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_gateway(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let config = lib::config::load_config(config_path)?;
    log::info!(
        "starting mysgw {} on {} bus",
        env!("CARGO_PKG_VERSION"),
        config.gateway.kind.as_str()
    );
    lib::gateway::run_gateway(config, Arc::new(LogStatusSink)).await
}

fn show_config(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let config = lib::config::load_config(config_path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
