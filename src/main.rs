//! Minimal CLI wrapper around [`meek_client::MeekClient`]: parses flags or
//! a TOML config file, starts the client, prints the bound local port, and
//! waits for Ctrl-C before shutting down cleanly.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use meek_client::{MeekClient, MeekConfig, MeekMode, RelayTarget};

#[derive(Parser, Debug)]
#[command(name = "meek-client", about = "meek-style HTTP tunneling client")]
struct Cli {
    /// Load the full configuration from a TOML file instead of flags.
    #[arg(long)]
    config: Option<PathBuf>,

    /// FRONTED or UNFRONTED, when not loading from --config.
    #[arg(long, value_enum)]
    mode: Option<CliMode>,

    #[arg(long)]
    session_id: Option<String>,

    #[arg(long)]
    target_address: Option<String>,

    #[arg(long)]
    recipient_public_key_b64: Option<String>,

    #[arg(long)]
    obfuscation_keyword: Option<String>,

    #[arg(long)]
    fronting_domain: Option<String>,

    #[arg(long)]
    fronting_host: Option<String>,

    #[arg(long)]
    relay_host: Option<String>,

    #[arg(long)]
    relay_port: Option<u16>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliMode {
    Fronted,
    Unfronted,
}

fn load_config(cli: &Cli) -> anyhow::Result<MeekConfig> {
    if let Some(path) = &cli.config {
        let text = std::fs::read_to_string(path)?;
        return Ok(MeekConfig::from_toml(&text)?);
    }

    let mode = match cli
        .mode
        .ok_or_else(|| anyhow::anyhow!("--mode is required without --config"))?
    {
        CliMode::Fronted => MeekMode::Fronted,
        CliMode::Unfronted => MeekMode::Unfronted,
    };
    let relay = match (&cli.relay_host, cli.relay_port) {
        (Some(host), Some(port)) => Some(RelayTarget {
            host: host.clone(),
            port,
        }),
        _ => None,
    };
    let config = MeekConfig {
        mode,
        session_id: cli
            .session_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--session-id is required"))?,
        target_address: cli
            .target_address
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--target-address is required"))?,
        recipient_public_key_b64: cli
            .recipient_public_key_b64
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--recipient-public-key-b64 is required"))?,
        obfuscation_keyword: cli.obfuscation_keyword.clone(),
        fronting_domain: cli.fronting_domain.clone(),
        fronting_host: cli.fronting_host.clone(),
        relay,
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let client = Arc::new(MeekClient::new(config)?);
    let port = client.start().await?;
    log::info!("[main.info] listening on 127.0.0.1:{port}");
    println!("{port}");

    tokio::signal::ctrl_c().await?;
    log::info!("[main.info] shutting down");
    client.stop().await;
    Ok(())
}
