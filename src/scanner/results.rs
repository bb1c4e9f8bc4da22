use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use super::partition::ScanRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Open,
    Closed,
    /// No answer within the probe timeout.
    Filtered,
}

impl PortStatus {
    pub fn is_open(self) -> bool {
        self == PortStatus::Open
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatus::Open => write!(f, "Open"),
            PortStatus::Closed => write!(f, "Closed"),
            PortStatus::Filtered => write!(f, "Filtered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortResult {
    pub port: u32,
    pub status: PortStatus,
    pub response_time: Option<f64>, // milliseconds
}

/// Lifecycle of a single scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Resolving,
    Partitioning,
    Scanning,
    Completed,
    Failed,
}

impl ScanState {
    pub fn can_transition_to(self, next: ScanState) -> bool {
        use ScanState::*;
        matches!(
            (self, next),
            (Idle, Resolving)
                | (Resolving, Partitioning)
                | (Partitioning, Scanning)
                | (Scanning, Completed)
                | (Resolving, Failed)
                | (Partitioning, Failed)
                | (Scanning, Failed)
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanState::Idle => "idle",
            ScanState::Resolving => "resolving",
            ScanState::Partitioning => "partitioning",
            ScanState::Scanning => "scanning",
            ScanState::Completed => "completed",
            ScanState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of the scanning phase. Only open ports are kept; everything
/// else is counted.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    open: Vec<PortResult>,
    probes: usize,
    skipped: usize,
}

impl ScanOutcome {
    pub fn record(&mut self, result: PortResult) {
        self.probes += 1;
        if result.status.is_open() {
            self.open.push(result);
        }
    }

    /// Count ports that were never probed because they lie above 65535.
    pub fn skip(&mut self, ports: usize) {
        self.skipped += ports;
    }

    pub fn probe_count(&self) -> usize {
        self.probes
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped
    }

    /// Open ports, ascending.
    pub fn open_ports(&self) -> Vec<u32> {
        let mut ports: Vec<u32> = self.open.iter().map(|p| p.port).collect();
        ports.sort_unstable();
        ports
    }

    #[cfg(test)]
    pub fn retained(&self) -> usize {
        self.open.len()
    }
}

/// Machine-readable summary of a finished scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: String,
    pub target_ip: IpAddr,
    pub range: ScanRange,
    pub thread_count: usize,
    pub state: ScanState,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub probes: usize,
    /// Ports above 65535 in the configured range.
    pub skipped: usize,
    pub open_ports: Vec<u32>,
}
