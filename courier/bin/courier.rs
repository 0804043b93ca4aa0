//! Bulk mail dispatch over authenticated SMTP relays.
//!
//! - `courier serve` (the default) runs the HTTP API
//! - `courier verify <relay.ron>` checks that a relay accepts us
//! - `courier send <request.json>` runs one bulk dispatch and prints the summary

#![allow(clippy::print_stdout)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use courier::{
    Courier,
    config::{self, CONFIG_ENV},
    controller,
};
use courier_api::wire::{BulkEmailRequest, BulkEmailResponse};
use courier_common::{RelayConfig, logging};
use courier_dispatch::CancellationToken;

/// Bulk mail dispatch over authenticated SMTP relays
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file, overriding discovery
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API until interrupted
    Serve,
    /// Connect, negotiate TLS and authenticate against a relay, then QUIT
    Verify {
        /// RON file with the relay settings
        relay: PathBuf,
    },
    /// Send one bulk request, given as JSON in the API's bulk shape
    Send {
        /// JSON request file, including the `smtp` relay settings
        request: PathBuf,
    },
}

/// The configuration to use. Only `serve` insists that a file exists.
fn load_config(explicit: Option<PathBuf>, required: bool) -> anyhow::Result<Courier> {
    if let Some(path) = explicit {
        return Courier::load(&path);
    }

    let from_env = std::env::var(CONFIG_ENV).ok();
    let candidates = config::default_paths();

    if required {
        Courier::load(&config::require(from_env.as_deref(), &candidates)?)
    } else {
        config::locate(from_env.as_deref(), &candidates)?
            .map_or_else(|| Ok(Courier::default()), |path| Courier::load(&path))
    }
}

async fn verify(courier: &Courier, relay: PathBuf) -> anyhow::Result<ExitCode> {
    let content = tokio::fs::read_to_string(&relay)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read relay from {}: {e}", relay.display()))?;
    let relay: RelayConfig = ron::from_str(&content)?;

    match courier.dispatcher().verify(&relay).await {
        Ok(()) => {
            println!("{}: SMTP connection successful", relay.redacted());
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{}: SMTP connection failed: {err}", relay.redacted());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn send(courier: &Courier, request: PathBuf) -> anyhow::Result<ExitCode> {
    let content = tokio::fs::read_to_string(&request)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read request from {}: {e}", request.display()))?;
    let request: BulkEmailRequest = serde_json::from_str(&content)?;
    let (relay, request) = request.into_parts()?;

    let cancel = CancellationToken::new();
    let on_signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if controller::termination().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let summary = courier
        .dispatcher()
        .dispatch_with_cancel(&relay, request, cancel)
        .await;
    on_signal.abort();
    let summary = summary?;

    let failed = summary.has_failures();
    println!(
        "{}",
        serde_json::to_string_pretty(&BulkEmailResponse::from(summary))?
    );

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            load_config(cli.config, true)?.run().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { relay } => {
            logging::init();
            verify(&load_config(cli.config, false)?, relay).await
        }
        Command::Send { request } => {
            logging::init();
            send(&load_config(cli.config, false)?, request).await
        }
    }
}
