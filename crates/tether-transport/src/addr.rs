//! Address parsing helpers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

use crate::TransportError;

/// Parses `"host:port"` into a socket address.
///
/// The port is taken after the last colon so IPv6 literals work with or
/// without brackets. A host that is not a literal IP is looked up through
/// DNS and the first result wins.
pub fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr, TransportError> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidAddress(endpoint.to_string()))?;

    let port: u16 = port.parse().map_err(|_| {
        TransportError::InvalidAddress(format!("invalid port in {endpoint}"))
    })?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::InvalidAddress(format!("{endpoint}: {e}")))?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(endpoint.to_string()))
}

/// The listen address for `port`: every interface when `share_local` is
/// set, loopback only otherwise.
pub fn host_addr(port: u16, share_local: bool) -> SocketAddr {
    let ip = if share_local {
        Ipv4Addr::UNSPECIFIED
    } else {
        Ipv4Addr::LOCALHOST
    };
    SocketAddr::new(IpAddr::V4(ip), port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_endpoint_ipv4() {
        let addr = resolve_endpoint("127.0.0.1:1337").unwrap();
        assert_eq!(addr, "127.0.0.1:1337".parse().unwrap());
    }

    #[test]
    fn test_resolve_endpoint_ipv6_uses_last_colon() {
        let addr = resolve_endpoint("::1:8080").unwrap();
        assert_eq!(addr, "[::1]:8080".parse().unwrap());

        let bracketed = resolve_endpoint("[::1]:8080").unwrap();
        assert_eq!(bracketed, addr);
    }

    #[test]
    fn test_resolve_endpoint_localhost_via_dns() {
        let addr = resolve_endpoint("localhost:9000").unwrap();
        assert_eq!(addr.port(), 9000);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_resolve_endpoint_missing_port_fails() {
        let result = resolve_endpoint("127.0.0.1");
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }

    #[test]
    fn test_resolve_endpoint_bad_port_fails() {
        let result = resolve_endpoint("127.0.0.1:http");
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }

    #[test]
    fn test_host_addr_share_local() {
        assert_eq!(host_addr(1337, true), "0.0.0.0:1337".parse().unwrap());
        assert_eq!(host_addr(1337, false), "127.0.0.1:1337".parse().unwrap());
    }
}
