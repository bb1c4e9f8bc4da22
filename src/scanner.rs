pub mod tcp;
mod partition;
mod resolve;
mod results;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ScanError;
use crate::output::Reporter;
pub use partition::{partition, PortChunk, ScanRange};
pub use resolve::{resolve_target, ScanTarget};
pub use results::{PortResult, PortStatus, ScanOutcome, ScanReport, ScanState};

/// Probes one port. Per-port failures come back as a `PortStatus`; an
/// `Err` means the whole target is unreachable and ends the scan.
#[async_trait]
pub trait Prober: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self, target: IpAddr, port: u16) -> Result<PortStatus, ScanError>;
}

/// A completed scan, ready to be summarised.
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub target: ScanTarget,
    pub range: ScanRange,
    pub thread_count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcome: ScanOutcome,
}

impl ScanRun {
    pub fn report(&self) -> ScanReport {
        ScanReport {
            target: self.target.host.clone(),
            target_ip: self.target.address,
            range: self.range,
            thread_count: self.thread_count,
            state: ScanState::Completed,
            start_time: self.start_time,
            end_time: self.end_time,
            probes: self.outcome.probe_count(),
            skipped: self.outcome.skipped_count(),
            open_ports: self.outcome.open_ports(),
        }
    }
}

pub struct Scanner {
    prober: Arc<dyn Prober>,
    thread_count: usize,
    probe_timeout: Duration,
    state: ScanState,
}

impl Scanner {
    pub fn new(prober: Arc<dyn Prober>, thread_count: usize, probe_timeout: Duration) -> Self {
        Self {
            prober,
            thread_count,
            probe_timeout,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    fn transition(&mut self, next: ScanState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "unexpected scan state transition");
        }
        debug!(from = %self.state, to = %next, "scan state");
        self.state = next;
    }

    /// Resolve `host`, partition `[low, high)`, and probe every port.
    pub async fn run(
        &mut self,
        host: &str,
        low: i64,
        high: i64,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<ScanRun, ScanError> {
        let result = self.run_phases(host, low, high, reporter, cancel).await;
        match &result {
            Ok(_) => self.transition(ScanState::Completed),
            Err(e) => {
                error!(error = %e, "scan failed");
                self.transition(ScanState::Failed);
            }
        }
        result
    }

    async fn run_phases(
        &mut self,
        host: &str,
        low: i64,
        high: i64,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<ScanRun, ScanError> {
        self.transition(ScanState::Resolving);
        let target = resolve_target(host).await?;
        if cancel.is_cancelled() {
            return Err(ScanError::Interrupted);
        }

        self.transition(ScanState::Partitioning);
        let range = ScanRange::new(low, high)?;
        if range.is_empty() {
            debug!(low, high, "empty port range, nothing to probe");
        }
        let chunks = partition(range, self.thread_count)?;

        self.transition(ScanState::Scanning);
        reporter.scan_started(&target, range, self.thread_count);

        let start_time = Utc::now();
        let started = Instant::now();
        let outcome = self.scan(target.address, chunks, reporter, cancel).await?;
        let elapsed = started.elapsed();

        info!(
            probes = outcome.probe_count(),
            skipped = outcome.skipped_count(),
            open = outcome.open_ports().len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "scan complete"
        );

        Ok(ScanRun {
            target,
            range,
            thread_count: self.thread_count,
            start_time,
            end_time: Utc::now(),
            elapsed,
            outcome,
        })
    }

    /// Run one worker per chunk and collect their results until every
    /// worker has finished. The first fatal error cancels the remaining
    /// workers; cancelling `cancel` from outside interrupts the scan.
    ///
    /// Workers only get the part of their chunk inside the TCP port space;
    /// the rest is counted as skipped.
    pub async fn scan(
        &self,
        target: IpAddr,
        chunks: impl IntoIterator<Item = PortChunk>,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let scan_token = cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel::<PortResult>();
        let mut workers = JoinSet::new();
        let mut outcome = ScanOutcome::default();

        // Empty chunks only ever trail the partition
        for chunk in chunks.into_iter().take_while(|c| !c.is_empty()) {
            let skipped = chunk.beyond_tcp_space();
            if skipped > 0 {
                debug!(chunk = chunk.index, skipped, "ports above 65535 are not probed");
                outcome.skip(skipped);
            }

            let ports = chunk.tcp_ports();
            if ports.is_empty() {
                continue;
            }
            workers.spawn(probe_chunk(
                Arc::clone(&self.prober),
                target,
                PortChunk { index: chunk.index, ports },
                self.probe_timeout,
                tx.clone(),
                scan_token.clone(),
            ));
        }
        drop(tx);

        let mut failure: Option<ScanError> = None;

        loop {
            tokio::select! {
                Some(result) = rx.recv() => {
                    reporter.port_probed(&result);
                    if result.status.is_open() {
                        reporter.port_open(result.port);
                    }
                    outcome.record(result);
                }
                Some(joined) = workers.join_next() => {
                    let worker_result = joined.unwrap_or_else(|e| Err(ScanError::Worker(e.to_string())));
                    if let Err(e) = worker_result {
                        if failure.is_none() {
                            error!(error = %e, "fatal probe error, cancelling workers");
                            scan_token.cancel();
                            failure = Some(e);
                        }
                    }
                }
                else => break,
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(ScanError::Interrupted);
        }

        Ok(outcome)
    }
}

/// Probe a chunk's ports in ascending order, stopping early on cancellation.
async fn probe_chunk(
    prober: Arc<dyn Prober>,
    target: IpAddr,
    chunk: PortChunk,
    probe_timeout: Duration,
    results: mpsc::UnboundedSender<PortResult>,
    cancel: CancellationToken,
) -> Result<(), ScanError> {
    if chunk.is_empty() {
        debug!(chunk = chunk.index, "empty chunk, nothing to probe");
        return Ok(());
    }
    debug!(
        chunk = chunk.index,
        start = chunk.ports.start,
        end = chunk.ports.end,
        ports = chunk.len(),
        prober = prober.name(),
        "worker started"
    );

    for port in chunk.ports.clone() {
        if cancel.is_cancelled() {
            debug!(chunk = chunk.index, port, "worker cancelled");
            return Ok(());
        }

        let Ok(tcp_port) = u16::try_from(port) else {
            break;
        };

        let started = Instant::now();
        let status = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(chunk = chunk.index, port, "worker cancelled mid-probe");
                return Ok(());
            }
            probed = timeout(probe_timeout, prober.probe(target, tcp_port)) => match probed {
                Ok(status) => status?,
                Err(_) => PortStatus::Filtered,
            },
        };
        tracing::trace!(port, %status, "probed");

        let result = PortResult {
            port,
            status,
            response_time: Some(started.elapsed().as_secs_f64() * 1000.0),
        };
        if results.send(result).is_err() {
            return Ok(());
        }
    }

    debug!(chunk = chunk.index, "worker finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingReporter;
    use std::collections::{HashMap, HashSet};
    use std::io;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    const TARGET: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));

    /// In-memory prober: accepts `open`, refuses everything else.
    #[derive(Default)]
    struct FakeProber {
        open: HashSet<u16>,
        unreachable: Option<u16>,
        hang: HashSet<u16>,
        delay: Option<Duration>,
        interrupt_at: Option<(u16, CancellationToken)>,
        probed: Mutex<HashMap<u16, usize>>,
    }

    impl FakeProber {
        fn accepting(ports: &[u16]) -> Self {
            Self { open: ports.iter().copied().collect(), ..Default::default() }
        }

        fn probe_count(&self) -> usize {
            self.probed.lock().unwrap().values().sum()
        }

        fn probed_ports(&self) -> HashMap<u16, usize> {
            self.probed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        fn name(&self) -> &str {
            "fake"
        }

        async fn probe(&self, _target: IpAddr, port: u16) -> Result<PortStatus, ScanError> {
            *self.probed.lock().unwrap().entry(port).or_insert(0) += 1;

            if let Some((at, token)) = &self.interrupt_at {
                if *at == port {
                    token.cancel();
                }
            }
            if self.unreachable == Some(port) {
                return Err(ScanError::HostUnreachable {
                    port,
                    source: io::Error::new(io::ErrorKind::Other, "network is unreachable"),
                });
            }
            if self.hang.contains(&port) {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            Ok(if self.open.contains(&port) { PortStatus::Open } else { PortStatus::Closed })
        }
    }

    fn chunks(low: i64, high: i64, threads: usize) -> Vec<PortChunk> {
        partition(ScanRange::new(low, high).unwrap(), threads).unwrap().collect()
    }

    fn make_scanner(prober: Arc<FakeProber>, threads: usize) -> Scanner {
        Scanner::new(prober, threads, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_reports_only_open_ports() {
        for threads in [1, 4, 100] {
            let prober = Arc::new(FakeProber::accepting(&[80, 443]));
            let reporter = RecordingReporter::default();
            let scanner = make_scanner(prober.clone(), threads);

            let outcome = scanner
                .scan(TARGET, chunks(1, 1000, threads), &reporter, &CancellationToken::new())
                .await
                .unwrap();

            let mut lines = reporter.lines();
            lines.sort();
            assert_eq!(lines, vec!["Port 443: Open", "Port 80: Open"], "threads = {threads}");
            assert_eq!(outcome.open_ports(), vec![80, 443]);
            assert_eq!(reporter.probed(), 999);
        }
    }

    #[tokio::test]
    async fn test_every_port_probed_exactly_once() {
        let prober = Arc::new(FakeProber::default());
        let reporter = RecordingReporter::default();
        let scanner = make_scanner(prober.clone(), 50);

        let outcome = scanner
            .scan(TARGET, chunks(0, 1000, 50), &reporter, &CancellationToken::new())
            .await
            .unwrap();

        let probed = prober.probed_ports();
        assert_eq!(probed.len(), 1000);
        assert!(probed.values().all(|&n| n == 1));
        assert_eq!(prober.probe_count(), 1000);
        assert_eq!(outcome.probe_count(), 1000);
        assert_eq!(reporter.probed(), 1000);
        assert!(outcome.open_ports().is_empty());
    }

    #[tokio::test]
    async fn test_empty_range_probes_nothing() {
        let prober = Arc::new(FakeProber::accepting(&[80]));
        let reporter = RecordingReporter::default();
        let mut scanner = make_scanner(prober.clone(), 8);

        let run = scanner
            .run("127.0.0.1", 80, 80, &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(prober.probe_count(), 0);
        assert!(reporter.lines().is_empty());
        assert_eq!(run.outcome.probe_count(), 0);
        assert_eq!(scanner.state(), ScanState::Completed);
    }

    #[tokio::test]
    async fn test_more_threads_than_ports() {
        let prober = Arc::new(FakeProber::accepting(&[21]));
        let reporter = RecordingReporter::default();
        let scanner = make_scanner(prober.clone(), 10);

        let outcome = scanner
            .scan(TARGET, chunks(20, 23, 10), &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(prober.probe_count(), 3);
        assert_eq!(outcome.open_ports(), vec![21]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_host_fails_whole_scan() {
        let prober = Arc::new(FakeProber {
            unreachable: Some(251),
            delay: Some(Duration::from_millis(1)),
            ..Default::default()
        });
        let reporter = RecordingReporter::default();
        let mut scanner = make_scanner(prober.clone(), 4);

        let result = scanner
            .run("127.0.0.1", 1, 1000, &reporter, &CancellationToken::new())
            .await;

        match result {
            Err(ScanError::HostUnreachable { port, .. }) => assert_eq!(port, 251),
            other => panic!("expected host unreachable, got {other:?}"),
        }
        assert_eq!(scanner.state(), ScanState::Failed);
        assert!(prober.probe_count() < 100, "siblings kept probing: {}", prober.probe_count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_interrupt_stops_workers() {
        let cancel = CancellationToken::new();
        let prober = Arc::new(FakeProber {
            interrupt_at: Some((10, cancel.clone())),
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let reporter = RecordingReporter::default();
        let mut scanner = make_scanner(prober.clone(), 1);

        let result = scanner.run("127.0.0.1", 1, 1000, &reporter, &cancel).await;

        assert!(matches!(result, Err(ScanError::Interrupted)));
        assert_eq!(scanner.state(), ScanState::Failed);
        assert_eq!(prober.probe_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_is_bounded_by_timeout() {
        let prober = Arc::new(FakeProber {
            open: [22].into_iter().collect(),
            hang: [23, 24].into_iter().collect(),
            ..Default::default()
        });
        let reporter = RecordingReporter::default();
        let scanner = make_scanner(prober.clone(), 2);

        let outcome = scanner
            .scan(TARGET, chunks(20, 26, 2), &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.open_ports(), vec![22]);
        assert_eq!(
            reporter.statuses(),
            vec![
                (20, PortStatus::Closed),
                (21, PortStatus::Closed),
                (22, PortStatus::Open),
                (23, PortStatus::Filtered),
                (24, PortStatus::Filtered),
                (25, PortStatus::Closed),
            ]
        );
        assert_eq!(reporter.lines(), vec!["Port 22: Open"]);
    }

    #[tokio::test]
    async fn test_ports_beyond_tcp_space_are_not_probed() {
        let prober = Arc::new(FakeProber::default());
        let reporter = RecordingReporter::default();
        let scanner = make_scanner(prober.clone(), 3);

        let outcome = scanner
            .scan(TARGET, chunks(65530, 65540, 3), &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(prober.probe_count(), 6);
        assert_eq!(outcome.probe_count(), 6);
        assert_eq!(outcome.skipped_count(), 4);
        assert!(reporter.statuses().iter().all(|&(port, _)| port <= 65535));
    }

    #[tokio::test]
    async fn test_range_far_beyond_tcp_space_holds_only_open_ports() {
        let prober = Arc::new(FakeProber::accepting(&[65535]));
        let reporter = RecordingReporter::default();
        let mut scanner = make_scanner(prober.clone(), 4);

        let run = scanner
            .run("127.0.0.1", 60_000, 4_000_000_000, &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(prober.probe_count(), 5536);
        assert_eq!(reporter.probed(), 5536);
        assert_eq!(run.outcome.skipped_count(), 4_000_000_000 - 65536);
        assert_eq!(run.outcome.retained(), 1);
        assert_eq!(run.report().open_ports, vec![65535]);
    }

    #[tokio::test]
    async fn test_range_entirely_beyond_tcp_space() {
        let prober = Arc::new(FakeProber::default());
        let reporter = RecordingReporter::default();
        let mut scanner = make_scanner(prober.clone(), 16);

        let run = scanner
            .run("127.0.0.1", 65536, u32::MAX as i64, &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(prober.probe_count(), 0);
        assert_eq!(reporter.probed(), 0);
        assert_eq!(run.outcome.retained(), 0);
        assert_eq!(run.report().skipped, u32::MAX as usize - 65536);
        assert_eq!(scanner.state(), ScanState::Completed);
    }

    #[tokio::test]
    async fn test_thread_count_far_above_range_size() {
        let prober = Arc::new(FakeProber::accepting(&[42]));
        let reporter = RecordingReporter::default();
        let mut scanner = make_scanner(prober.clone(), 1_000_000_000_000);

        let run = scanner
            .run("127.0.0.1", 1, 100, &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(prober.probe_count(), 99);
        assert_eq!(run.report().open_ports, vec![42]);
        assert_eq!(run.report().thread_count, 1_000_000_000_000);
    }

    #[tokio::test]
    async fn test_invalid_range_fails_before_probing() {
        let prober = Arc::new(FakeProber::default());
        let reporter = RecordingReporter::default();
        let mut scanner = make_scanner(prober.clone(), 4);

        let result = scanner
            .run("127.0.0.1", 100, 10, &reporter, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ScanError::InvalidRange { low: 100, high: 10 })));
        assert_eq!(scanner.state(), ScanState::Failed);
        assert_eq!(prober.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_completed_run_report() {
        let prober = Arc::new(FakeProber::accepting(&[8080]));
        let reporter = RecordingReporter::default();
        let mut scanner = make_scanner(prober, 4);

        let run = scanner
            .run("127.0.0.1", 8000, 8100, &reporter, &CancellationToken::new())
            .await
            .unwrap();
        let report = run.report();

        assert_eq!(report.state, ScanState::Completed);
        assert_eq!(report.probes, 100);
        assert_eq!(report.open_ports, vec![8080]);
        assert_eq!(report.thread_count, 4);
        assert!(report.end_time >= report.start_time);
    }
}
