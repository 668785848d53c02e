//! SSRF guard (§4.3): resolve the host, fail the job if any resolved address
//! is private, link-local, loopback, or reserved (IPv4 and IPv6).

use crate::error::TransportError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::net::lookup_host;

/// True if this address must never be dialed as part of a fetch job.
pub fn is_blocked(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(addr: Ipv4Addr) -> bool {
    addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_broadcast()
        || addr.is_documentation()
        || addr.is_unspecified()
        || addr.octets()[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (addr.octets()[0] == 100 && (64..=127).contains(&addr.octets()[1]))
}

fn is_blocked_v6(addr: Ipv6Addr) -> bool {
    addr.is_loopback()
        || addr.is_unspecified()
        || addr.is_unique_local()
        || (addr.segments()[0] & 0xffc0) == 0xfe80 // link-local
        || addr.to_ipv4_mapped().map(is_blocked_v4).unwrap_or(false)
}

/// Resolves `host:port` and blocks the job unless every resolved address is
/// publicly routable. Matches on hostname so the caller can log it in the
/// block error without re-threading the original URL through.
pub async fn guard(host: &str, port: u16) -> Result<(), TransportError> {
    let target = format!("{host}:{port}");
    let addrs = lookup_host(&target).await.map_err(|source| TransportError::Dns {
        host: host.to_string(),
        source,
    })?;

    let mut any = false;
    for socket_addr in addrs {
        any = true;
        let ip = socket_addr.ip();
        if is_blocked(ip) {
            return Err(TransportError::SsrfBlocked {
                host: host.to_string(),
                addr: ip.to_string(),
            });
        }
    }
    if !any {
        return Err(TransportError::Dns {
            host: host.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_loopback_v4() {
        assert!(is_blocked("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn blocks_private_v4() {
        assert!(is_blocked("10.0.0.5".parse().unwrap()));
        assert!(is_blocked("192.168.1.1".parse().unwrap()));
        assert!(is_blocked("172.16.0.1".parse().unwrap()));
    }

    #[test]
    fn blocks_link_local_v4_and_v6() {
        assert!(is_blocked("169.254.1.1".parse().unwrap()));
        assert!(is_blocked("fe80::1".parse().unwrap()));
    }

    #[test]
    fn blocks_loopback_v6() {
        assert!(is_blocked("::1".parse().unwrap()));
    }

    #[test]
    fn allows_public_v4() {
        assert!(!is_blocked("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn allows_public_v6() {
        assert!(!is_blocked("2606:4700:4700::1111".parse().unwrap()));
    }

    #[test]
    fn blocks_carrier_grade_nat() {
        assert!(is_blocked("100.64.0.1".parse().unwrap()));
    }
}
