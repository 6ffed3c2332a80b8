//! Binary entrypoint for the `corebus` demo application.
//!
//! Commands:
//! - `run [--config <path>]` - launch the dispatch core with the built-in
//!   `$SYS`, `$MAILBOX`, and `echo` gateways attached, and block until
//!   `$SYS/exit` is published.
//! - `check-config [--config <path>]` - load and validate a config file
//!   without starting anything.
//!
//! See the library crate docs for module-level details: `corebus::`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use corebus::application::Application;
use corebus::config::AppConfig;
use corebus::gateway::echo::EchoGateway;
use corebus::router::GatewayId;
use corebus::storage::sled_backend::SledStorage;

#[derive(Parser)]
#[command(name = "corebus-demo")]
#[command(about = "Reference host application for the corebus dispatch core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "corebus.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the dispatch core and block until shutdown
    Run,
    /// Load and validate the config file, then exit
    CheckConfig,
}

fn init_logging(verbosity: u8) {
    let base_level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(base_level).init();
}

fn load_config(path: &str) -> AppConfig {
    match AppConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("using default configuration: {}", e);
            AppConfig::default()
        }
    }
}

/// Builds, launches, and blocks on the dispatch core. Runs as a blocking
/// tokio task so the async runtime stays free for any future IO-bound
/// gateway (e.g. a network transport) to run alongside it.
async fn run(config: AppConfig) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let storage_path = config.storage_path.clone();
        let app = Application::new(config);

        app.add_system_gateway()?;
        app.add_mailbox_gateway()?;

        let echo_id = GatewayId::parse("echo")?;
        app.add_gateway(echo_id.clone(), Box::new(EchoGateway::new(app.receive_handle(&echo_id))))?;

        app.set_persistent_storage(SledStorage::open(&storage_path)?)?;

        let _exit_sub = app.subscribe("$SYS/+", 0, |topic, _payload| {
            info!("$SYS/{} received", topic);
        })?;

        app.launch()?;
        info!("corebus demo application launched");
        app.join();
        info!("corebus demo application stopped");
        Ok(())
    })
    .await
    .context("dispatch task panicked")?
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run => run(load_config(&cli.config)).await,
        Commands::CheckConfig => {
            let config = AppConfig::load(&cli.config)?;
            println!("{:#?}", config);
            Ok(())
        }
    }
}
