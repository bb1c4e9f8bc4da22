use serde::Serialize;
use std::net::IpAddr;
use tokio::net::lookup_host;

use crate::error::ScanError;

/// The host being scanned, resolved once before any probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanTarget {
    pub host: String,
    pub address: IpAddr,
}

/// Resolve a hostname or literal IP address. IPv4 answers are preferred.
pub async fn resolve_target(host: &str) -> Result<ScanTarget, ScanError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ScanError::Resolution {
            host: String::new(),
            reason: "empty hostname".to_string(),
        });
    }

    if let Ok(address) = host.parse::<IpAddr>() {
        return Ok(ScanTarget { host: host.to_string(), address });
    }

    let addrs: Vec<IpAddr> = lookup_host((host, 0))
        .await
        .map_err(|e| ScanError::Resolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .map(|addr| addr.ip())
        .collect();

    let address = addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ScanError::Resolution {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        })?;

    tracing::debug!(host, %address, "resolved target");
    Ok(ScanTarget { host: host.to_string(), address })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_literal_address() {
        let target = resolve_target(" 10.0.0.7 ").await.unwrap();
        assert_eq!(target.host, "10.0.0.7");
        assert_eq!(target.address, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));

        let v6 = resolve_target("::1").await.unwrap();
        assert!(v6.address.is_ipv6());
    }

    #[tokio::test]
    async fn test_localhost_resolves_to_loopback() {
        let target = resolve_target("localhost").await.unwrap();
        assert!(target.address.is_loopback());
    }

    #[tokio::test]
    async fn test_empty_host_fails() {
        assert!(matches!(resolve_target("   ").await, Err(ScanError::Resolution { .. })));
    }
}
