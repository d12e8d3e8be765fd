use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use client::{
    AssetLoader, EngineCommand, HttpAssetLoader, ManifestLoader, SessionManager, TransportLink,
};
use common::{DEFAULT_SERVER_PORT, SystemClock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use url::Url;

#[derive(Parser, Debug)]
#[command(
    name = "lockstep-viewer",
    about = "Follow a synchronized playback session from the terminal"
)]
struct Args {
    /// WebSocket URL of the sync server
    #[arg(long, default_value_t = format!("ws://localhost:{}/ws", DEFAULT_SERVER_PORT))]
    url: String,

    /// Base URL scene asset paths are resolved against. Derived from --url when omitted.
    #[arg(long)]
    asset_base: Option<String>,

    /// How often to log the local frame
    #[arg(long, default_value_t = 1000)]
    report_interval_ms: u64,

    /// Download scene assets instead of only resolving their URLs
    #[arg(long)]
    fetch_assets: bool,
}

/// One line typed on stdin
#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Gesture(EngineCommand),
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    let asset_base = match args.asset_base {
        Some(base) => base,
        None => asset_base_from(&args.url)?,
    };
    let loader: Arc<dyn AssetLoader> = if args.fetch_assets {
        Arc::new(HttpAssetLoader::new())
    } else {
        Arc::new(ManifestLoader)
    };

    let mut link = TransportLink::connect(&args.url).await?;
    let mut sessions = SessionManager::new(
        link.sender(),
        loader,
        Arc::new(SystemClock),
        asset_base,
        Duration::from_millis(args.report_interval_ms),
    );

    info!("Commands: play | pause | seek <frame> | rate <x> | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            packet = link.next_packet() => match packet {
                Some(packet) => sessions.handle_packet(packet).await,
                None => {
                    warn!("Lost connection to server");
                    break;
                }
            },

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(Command::Gesture(command))) => {
                        if let Err(e) = sessions.gesture(command) {
                            warn!("{}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    sessions.dispose().await;
    link.close().await;
    info!("Viewer stopped");
    Ok(())
}

/// http(s) origin of the WebSocket URL, where the server also serves assets
fn asset_base_from(ws_url: &str) -> Result<String> {
    let mut url = Url::parse(ws_url).with_context(|| format!("Invalid server URL {}", ws_url))?;
    let scheme = match url.scheme() {
        "wss" | "https" => "https",
        _ => "http",
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("Cannot derive an asset URL from {}", ws_url))?;
    url.set_path("");
    url.set_query(None);
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let mut number = |what: &str| -> Result<f64> {
        let arg = words
            .next()
            .ok_or_else(|| anyhow!("{} needs a {}", verb, what))?;
        arg.parse()
            .with_context(|| format!("'{}' is not a valid {}", arg, what))
    };

    let command = match verb {
        "play" => Command::Gesture(EngineCommand::Play),
        "pause" => Command::Gesture(EngineCommand::Pause),
        "seek" => Command::Gesture(EngineCommand::Seek(number("frame")?)),
        "rate" => {
            let rate = number("rate")?;
            if rate <= 0.0 {
                return Err(anyhow!("rate must be positive"));
            }
            Command::Gesture(EngineCommand::SetRate(rate))
        }
        "quit" | "exit" => Command::Quit,
        other => {
            error!("Unknown command '{}'", other);
            return Ok(None);
        }
    };
    Ok(Some(command))
}
