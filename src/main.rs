mod app;
mod cli;
mod config;
mod error;
mod output;
mod scanner;

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::{prompt_target, Cli, OutputFormat};
use crate::error::ScanError;
use crate::scanner::tcp::TcpConnectProber;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output_format;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !already_reported(format, &e) {
                eprintln!("{} {}", "error:".red().bold(), e);
            }
            let code = e.downcast_ref::<ScanError>().map(ScanError::exit_code).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.output_format == OutputFormat::Human && !cli.no_clear {
        output::clear_screen();
    }

    let host = match &cli.target {
        Some(target) => target.clone(),
        None => prompt_target()?,
    };

    // Armed after the prompt so Ctrl-C at the prompt still exits immediately
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("You pressed Ctrl+C");
                cancel.cancel();
            }
        });
    }

    let reporter = output::build_reporter(cli.output_format)?;
    let prober = Arc::new(TcpConnectProber::new(cli.timeout));

    app::execute(&cli, &host, prober, reporter.as_ref(), &cancel).await?;
    Ok(())
}

/// Scan errors reach the reporter first; the JSON reporter prints them as the
/// failure document, so they are not repeated on stderr.
fn already_reported(format: OutputFormat, error: &anyhow::Error) -> bool {
    format == OutputFormat::Json && error.downcast_ref::<ScanError>().is_some()
}
