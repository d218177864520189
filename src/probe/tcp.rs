//! TCP connect probe.
//!
//! Resolution runs on tokio; the connect itself is a blocking socket2
//! `connect_timeout` inside spawn_blocking so a hanging peer never ties up
//! the scheduler.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use super::ProbeError;

/// Connect to `address:port` within `timeout`.
///
/// The timeout covers name resolution and the connect together.
pub async fn run_tcp_probe(address: &str, port: u16, timeout: Duration) -> Result<(), ProbeError> {
    let start = Instant::now();

    let addr = tokio::time::timeout(timeout, resolve_address(address, port))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;

    let remaining = timeout
        .checked_sub(start.elapsed())
        .filter(|d| !d.is_zero())
        .ok_or(ProbeError::Timeout(timeout))?;

    tokio::task::spawn_blocking(move || connect_blocking(addr, remaining, timeout))
        .await
        .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?
}

/// Resolve hostname to the first socket address.
async fn resolve_address(address: &str, port: u16) -> Result<SocketAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = tokio::net::lookup_host((address, port))
        .await
        .map_err(|e| ProbeError::Resolve(e.to_string()))?;

    addrs
        .next()
        .ok_or_else(|| ProbeError::Resolve(format!("no addresses found for {}", address)))
}

fn connect_blocking(addr: SocketAddr, remaining: Duration, timeout: Duration) -> Result<(), ProbeError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ProbeError::Network(format!("failed to create socket: {}", e)))?;

    socket.connect_timeout(&addr.into(), remaining).map_err(|e| {
        if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(format!("connect to {} failed: {}", addr, e))
        }
    })?;

    // Only reachability matters; close straight away
    let _ = socket.shutdown(std::net::Shutdown::Both);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = run_tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = run_tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        tokio_test::assert_err!(result);
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let addr = resolve_address("::1", 25).await.unwrap();
        assert_eq!(addr, "[::1]:25".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_invalid_host() {
        let result = resolve_address("host.invalid", 80).await;
        assert!(matches!(result, Err(ProbeError::Resolve(_))));
    }
}
