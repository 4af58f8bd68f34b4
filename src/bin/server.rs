//! # Echo Server Binary
//!
//! Accepts any number of clients; each one gets its own session task.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lcg_echo::{config, Config, Server};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// LCG echo protocol server
#[derive(Parser)]
#[command(name = "server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides the config file)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print a sample configuration file and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", config::generate_sample());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if let Some(path) = &cli.write_config {
        config::save(&config, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let level = match cli.verbose {
        0 => config.logging.level(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")?;

    let server = Server::bind(config.server.addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr()))?;

    server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Server stopped");
    Ok(())
}
