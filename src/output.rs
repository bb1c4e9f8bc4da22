use anyhow::Result;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use crate::cli::OutputFormat;
use crate::error::ScanError;
use crate::scanner::{PortResult, ScanRange, ScanReport, ScanTarget};

const BANNER_WIDTH: usize = 60;

/// Sink for scan progress. Called from the single collecting loop, so
/// implementations only need to keep each line intact.
pub trait Reporter: Send + Sync {
    fn scan_started(&self, _target: &ScanTarget, _range: ScanRange, _thread_count: usize) {}

    fn port_probed(&self, _result: &PortResult) {}

    fn port_open(&self, port: u32);

    fn scan_finished(&self, _report: &ScanReport, _elapsed: Duration) {}

    fn scan_failed(&self, _error: &ScanError) {}
}

pub fn build_reporter(format: OutputFormat) -> Result<Box<dyn Reporter>> {
    Ok(match format {
        OutputFormat::Human => Box::new(ConsoleReporter::new(io::stdout().is_terminal())?),
        OutputFormat::Json => Box::new(JsonReporter),
    })
}

/// Literal report line for an open port.
pub fn open_port_line(port: u32) -> String {
    format!("Port {}: Open", port)
}

/// Render elapsed time as `H:MM:SS.ffffff`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        total / 3600,
        (total / 60) % 60,
        total % 60,
        elapsed.subsec_micros()
    )
}

pub fn clear_screen() {
    if io::stdout().is_terminal() {
        print!("\x1B[2J\x1B[1;1H");
        let _ = io::stdout().flush();
    }
}

/// Human-readable reporter: banner, one line per open port as found, and a
/// closing summary.
pub struct ConsoleReporter {
    progress: ProgressBar,
}

impl ConsoleReporter {
    pub fn new(show_progress: bool) -> Result<Self> {
        let progress = if show_progress {
            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.cyan} [{elapsed_precise}] {bar:40.green/bright_black} {pos}/{len} ports probed ({eta})")?
                    .progress_chars("█▉▊▋▌▍▎▏ "),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        Ok(Self { progress })
    }

    fn emit(&self, line: &str) {
        // suspend() hides the bar while the line is written, even when hidden
        self.progress.suspend(|| {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", line);
        });
    }
}

impl Reporter for ConsoleReporter {
    fn scan_started(&self, target: &ScanTarget, range: ScanRange, thread_count: usize) {
        let rule = "-".repeat(BANNER_WIDTH);
        self.emit(&rule.bright_black().to_string());
        self.emit(&format!(
            "Please wait, scanning remote host.... {}",
            target.address.to_string().bold()
        ));
        self.emit(&rule.bright_black().to_string());
        tracing::info!(
            host = %target.host,
            low = range.low,
            high = range.high,
            threads = thread_count,
            "scan started"
        );
        self.progress.set_length(range.probe_len() as u64);
    }

    fn port_probed(&self, _result: &PortResult) {
        self.progress.inc(1);
    }

    fn port_open(&self, port: u32) {
        self.emit(&open_port_line(port));
    }

    fn scan_finished(&self, report: &ScanReport, elapsed: Duration) {
        self.progress.finish_and_clear();

        let summary = match report.open_ports.len() {
            0 => "No open ports found".yellow().to_string(),
            1 => "Found 1 open port".green().bold().to_string(),
            n => format!("Found {} open ports", n).green().bold().to_string(),
        };
        self.emit(&summary);
        self.emit(&format!("Scanning Completed in: {}", format_elapsed(elapsed)));
    }

    fn scan_failed(&self, _error: &ScanError) {
        self.progress.abandon();
    }
}

/// Prints nothing while scanning and one JSON document at the end.
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn port_open(&self, _port: u32) {}

    fn scan_finished(&self, report: &ScanReport, _elapsed: Duration) {
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!(error = %e, "failed to serialize scan report"),
        }
    }

    fn scan_failed(&self, error: &ScanError) {
        let doc = serde_json::json!({ "state": "failed", "error": error.to_string() });
        println!("{}", doc);
    }
}

/// Keeps every reported line and probe status in memory.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingReporter {
    lines: std::sync::Mutex<Vec<String>>,
    statuses: std::sync::Mutex<Vec<(u32, crate::scanner::PortStatus)>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn probed(&self) -> usize {
        self.statuses.lock().unwrap().len()
    }

    /// Probe statuses ordered by port.
    pub fn statuses(&self) -> Vec<(u32, crate::scanner::PortStatus)> {
        let mut statuses = self.statuses.lock().unwrap().clone();
        statuses.sort_by_key(|&(port, _)| port);
        statuses
    }
}

#[cfg(test)]
impl Reporter for RecordingReporter {
    fn port_probed(&self, result: &PortResult) {
        self.statuses.lock().unwrap().push((result.port, result.status));
    }

    fn port_open(&self, port: u32) {
        self.lines.lock().unwrap().push(open_port_line(port));
    }
}
