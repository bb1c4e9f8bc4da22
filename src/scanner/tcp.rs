use async_trait::async_trait;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use super::results::PortStatus;
use super::Prober;
use crate::error::ScanError;

pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 100;

// Errors that say the target itself is gone rather than one port.
#[cfg(unix)]
const HOST_LEVEL_ERRORS: &[i32] = &[libc::ENETUNREACH, libc::ENETDOWN];
// WSAENETDOWN, WSAENETUNREACH
#[cfg(windows)]
const HOST_LEVEL_ERRORS: &[i32] = &[10050, 10051];
#[cfg(not(any(unix, windows)))]
const HOST_LEVEL_ERRORS: &[i32] = &[];

// Host unreachable is also what an ICMP admin-prohibited reject looks like,
// so it only filters the port.
#[cfg(unix)]
const PORT_REJECTED_ERRORS: &[i32] = &[libc::EHOSTUNREACH];
// WSAEHOSTUNREACH
#[cfg(windows)]
const PORT_REJECTED_ERRORS: &[i32] = &[10065];
#[cfg(not(any(unix, windows)))]
const PORT_REJECTED_ERRORS: &[i32] = &[];

/// TCP connect scan of a single port.
///
/// The connection is dropped before returning on every path, and the
/// pending connect is abandoned once `timeout_ms` elapses.
pub async fn connect_scan(target: IpAddr, port: u16, timeout_ms: u64) -> Result<PortStatus, ScanError> {
    let addr = SocketAddr::new(target, port);

    match timeout(Duration::from_millis(timeout_ms), TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Ok(PortStatus::Open)
        }
        Ok(Err(e)) => classify_connect_error(port, e),
        Err(_) => Ok(PortStatus::Filtered),
    }
}

/// Turn a failed connect into a per-port status, or a fatal error when the
/// failure is about the host.
pub fn classify_connect_error(port: u16, error: io::Error) -> Result<PortStatus, ScanError> {
    if has_os_code(&error, HOST_LEVEL_ERRORS) {
        return Err(ScanError::HostUnreachable { port, source: error });
    }
    if has_os_code(&error, PORT_REJECTED_ERRORS) {
        tracing::debug!(port, error = %error, "connect rejected, treating port as filtered");
        return Ok(PortStatus::Filtered);
    }

    match error.kind() {
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            Ok(PortStatus::Closed)
        }
        ErrorKind::TimedOut => Ok(PortStatus::Filtered),
        _ => {
            tracing::debug!(port, error = %error, "connect failed, treating port as closed");
            Ok(PortStatus::Closed)
        }
    }
}

fn has_os_code(error: &io::Error, codes: &[i32]) -> bool {
    error
        .raw_os_error()
        .map(|code| codes.contains(&code))
        .unwrap_or(false)
}

/// Prober backed by real TCP connections.
pub struct TcpConnectProber {
    timeout_ms: u64,
}

impl TcpConnectProber {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }
}

impl Default for TcpConnectProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT_MS)
    }
}

#[async_trait]
impl Prober for TcpConnectProber {
    fn name(&self) -> &str {
        "tcp_connect"
    }

    async fn probe(&self, target: IpAddr, port: u16) -> Result<PortStatus, ScanError> {
        connect_scan(target, port, self.timeout_ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_listening_port_is_open() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let status = connect_scan(LOCALHOST, port, 1000).await.unwrap();
        assert_eq!(status, PortStatus::Open);
    }

    #[tokio::test]
    async fn test_unbound_port_is_closed() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = TcpConnectProber::new(1000);
        let status = prober.probe(LOCALHOST, port).await.unwrap();
        assert_eq!(status, PortStatus::Closed);
    }

    #[test]
    fn test_refusal_is_closed() {
        let err = io::Error::new(ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify_connect_error(80, err).unwrap(), PortStatus::Closed);

        let err = io::Error::new(ErrorKind::TimedOut, "timed out");
        assert_eq!(classify_connect_error(80, err).unwrap(), PortStatus::Filtered);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreachable_is_fatal() {
        for code in [libc::ENETUNREACH, libc::ENETDOWN] {
            let err = io::Error::from_raw_os_error(code);
            match classify_connect_error(443, err) {
                Err(ScanError::HostUnreachable { port, .. }) => assert_eq!(port, 443),
                other => panic!("expected fatal error, got {other:?}"),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_admin_prohibited_only_filters_the_port() {
        let err = io::Error::from_raw_os_error(libc::EHOSTUNREACH);
        assert_eq!(classify_connect_error(8080, err).unwrap(), PortStatus::Filtered);
    }

    #[cfg(unix)]
    #[test]
    fn test_refused_errno_is_closed() {
        let err = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        assert_eq!(classify_connect_error(22, err).unwrap(), PortStatus::Closed);
    }
}
