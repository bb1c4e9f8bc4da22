use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::ScanError;
use crate::output::Reporter;
use crate::scanner::{Prober, ScanReport, Scanner};

/// Load the configuration and run a full scan of `host`.
///
/// Configuration problems are reported before anything is probed.
pub async fn execute(
    cli: &Cli,
    host: &str,
    prober: Arc<dyn Prober>,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<ScanReport, ScanError> {
    let result = run(cli, host, prober, reporter, cancel).await;
    if let Err(e) = &result {
        reporter.scan_failed(e);
    }
    result
}

async fn run(
    cli: &Cli,
    host: &str,
    prober: Arc<dyn Prober>,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<ScanReport, ScanError> {
    let path = Config::resolve_path(cli.config.clone());
    tracing::debug!(path = %path.display(), "loading config");
    let config = Config::load(&path)?.with_overrides(cli.low, cli.high, cli.threads)?;

    let mut scanner = Scanner::new(prober, config.thread_count(), Duration::from_millis(cli.timeout));
    let run = scanner
        .run(host, config.range.low, config.range.high, reporter, cancel)
        .await?;

    let report = run.report();
    reporter.scan_finished(&report, run.elapsed);
    Ok(report)
}
