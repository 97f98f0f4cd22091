use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

use wsdump::config::{CliOverrides, SessionConfig, load_config, parse_verbosity};
use wsdump::error::SessionError;

#[derive(Parser)]
#[command(name = "wsdump")]
#[command(about = "Interactive WebSocket console client")]
struct Args {
    /// WebSocket url, e.g. ws://echo.websocket.org/
    #[arg(value_name = "WS_URL")]
    url: String,

    /// Verbosity: 1 shows opcodes, 2 also traces the websocket library
    #[arg(short, long, num_args = 0..=1, default_missing_value = "1", value_parser = verbosity_arg)]
    verbose: Option<u8>,

    /// Ignore invalid TLS certificates and hostnames
    #[arg(short, long)]
    nocert: bool,

    /// Subprotocols to request
    #[arg(short, long, num_args = 0..)]
    subprotocols: Option<Vec<String>>,

    /// Origin header value
    #[arg(short, long)]
    origin: Option<String>,

    /// Text to send right after connecting
    #[arg(short, long)]
    text: Option<String>,

    /// Encoding of the local terminal (defaults to the locale's charset)
    #[arg(short, long)]
    encoding: Option<String>,

    /// Print inbound messages without color
    #[arg(long)]
    no_color: bool,

    /// Config file (defaults to <config dir>/wsdump/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            url: self.url,
            verbose: self.verbose,
            nocert: self.nocert,
            subprotocols: self.subprotocols,
            origin: self.origin,
            text: self.text,
            encoding: self.encoding,
            no_color: self.no_color,
        }
    }
}

fn verbosity_arg(value: &str) -> Result<u8, String> {
    parse_verbosity(value).map_err(|e| e.to_string())
}

fn init_logging(verbosity: u8) {
    let default_directive = if verbosity >= 2 {
        "wsdump=debug,tokio_tungstenite=trace,tungstenite=trace"
    } else {
        "wsdump=warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let figment = load_config(args.config.as_deref());
    let config = SessionConfig::resolve(&figment, args.into_overrides())
        .context("Failed to load configuration")?;

    init_logging(config.verbosity);

    match wsdump::run(&config).await {
        Ok(end) => {
            info!(?end, "session ended");
            Ok(())
        }
        Err(SessionError::Startup(e)) => {
            Err(e).with_context(|| format!("Failed to connect to {}", config.url))
        }
        Err(e) => Err(e.into()),
    }
}
