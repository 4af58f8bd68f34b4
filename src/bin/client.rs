//! # Echo Client Binary
//!
//! Logs in with the given credentials, then sends every line typed on stdin
//! as a ciphered echo request and prints what the server sends back.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lcg_echo::{config, Config, Connection, ConnectionEvent, Credentials, ProtocolError};
use tokio::io::BufReader;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// LCG echo protocol client
#[derive(Parser)]
#[command(name = "client")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Login name (up to 28 bytes are sent)
    username: String,

    /// Password (up to 4 bytes are sent)
    password: String,

    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn prompt() {
    print!("Enter message: ");
    let _ = std::io::stdout().flush();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    if let Some(host) = cli.host {
        config.client.host = host;
    }
    if let Some(port) = cli.port {
        config.client.port = port;
    }

    let level = match cli.verbose {
        0 => config.logging.level(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")?;

    let credentials = Credentials::new(cli.username, cli.password);
    let mut connection =
        Connection::connect(&config.client.host, config.client.port, &credentials)
            .await
            .with_context(|| {
                format!("Failed to connect to {}:{}", config.client.host, config.client.port)
            })?;
    println!("Connected to server.");

    match connection.login().await {
        Ok(()) => {
            println!("Login to server successful !");
            prompt();
        }
        Err(ProtocolError::LoginRejected(status)) => {
            eprintln!("Login failed with status: {}", status);
            return Ok(());
        }
        Err(e) => return Err(e).context("Login failed"),
    }

    let stdin = BufReader::new(tokio::io::stdin());
    connection
        .run(stdin, |event| match event {
            ConnectionEvent::Echo { text, .. } => {
                println!("Server responded with: {}", text);
                prompt();
            }
            ConnectionEvent::LineTooLong { len } => {
                eprintln!("Message of {} bytes is too long to send", len);
                prompt();
            }
        })
        .await
        .context("Connection failed")?;

    Ok(())
}
