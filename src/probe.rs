//! Network reachability checks for monitored hosts.
//!
//! The probe is deliberately infallible: DNS failures, timeouts and
//! permission errors all collapse to a negative result so that a flaky
//! network can never take down the scheduler loop.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::random;
use tokio::net::TcpStream;
use tracing::debug;

/// Combined result of one reachability check against a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeOutcome {
    pub is_online: bool,
    pub port_open: bool,
    pub response_time_ms: Option<u32>,
}

impl ProbeOutcome {
    /// A check counts as healthy only when the host answered AND the
    /// monitored port accepted a connection.
    pub fn is_healthy(&self) -> bool {
        self.is_online && self.port_open
    }
}

/// Seam between the monitoring service and the network, so ticks can be
/// driven by a scripted probe in tests.
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn check_comprehensive(&self, host: &str, port: u16) -> ProbeOutcome;
}

pub struct NetworkProbe {
    ping_timeout: Duration,
    port_timeout: Duration,
}

impl NetworkProbe {
    pub fn new(ping_timeout: Duration, port_timeout: Duration) -> Self {
        Self {
            ping_timeout,
            port_timeout,
        }
    }

    /// Checks basic reachability of a host. Never errors; any failure mode
    /// maps to `(false, None)`.
    ///
    /// Prefers ICMP echo. When the process cannot open an ICMP socket
    /// (unprivileged), falls back to a bounded TCP connect against
    /// `fallback_port`.
    pub async fn ping(&self, host: &str, fallback_port: u16) -> (bool, Option<u32>) {
        let Some(addr) = resolve(host).await else {
            debug!(host, "ping: DNS resolution failed");
            return (false, None);
        };

        match surge_ping::Client::new(&surge_ping::Config::default()) {
            Ok(client) => {
                let mut pinger = client.pinger(addr, surge_ping::PingIdentifier(random())).await;
                pinger.timeout(self.ping_timeout);
                match pinger.ping(surge_ping::PingSequence(0), &[]).await {
                    Ok((_reply, duration)) => (true, Some(duration.as_millis() as u32)),
                    Err(e) => {
                        debug!(host, error = %e, "ping: echo failed");
                        (false, None)
                    }
                }
            }
            Err(e) => {
                debug!(host, error = %e, "ping: no ICMP socket, using TCP fallback");
                self.tcp_reachability(addr, fallback_port).await
            }
        }
    }

    /// Attempts a TCP connection to `host:port` within the port timeout.
    /// Any error, including timeout, maps to `false`.
    pub async fn check_port(&self, host: &str, port: u16) -> bool {
        match tokio::time::timeout(self.port_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "port check failed");
                false
            }
            Err(_) => {
                debug!(host, port, "port check timed out");
                false
            }
        }
    }

    async fn tcp_reachability(&self, addr: IpAddr, port: u16) -> (bool, Option<u32>) {
        let start = Instant::now();
        match tokio::time::timeout(self.ping_timeout, TcpStream::connect((addr, port))).await {
            Ok(Ok(_stream)) => (true, Some(start.elapsed().as_millis() as u32)),
            _ => (false, None),
        }
    }
}

#[async_trait]
impl HostProbe for NetworkProbe {
    /// Runs the reachability and port checks concurrently; a failure in one
    /// never affects the other.
    async fn check_comprehensive(&self, host: &str, port: u16) -> ProbeOutcome {
        let (ping_result, port_open) = tokio::join!(self.ping(host, port), self.check_port(host, port));
        let (is_online, response_time_ms) = ping_result;
        ProbeOutcome {
            is_online,
            port_open,
            response_time_ms,
        }
    }
}

/// Resolves a hostname or IP literal to an address off the async runtime.
async fn resolve(host: &str) -> Option<IpAddr> {
    let host = host.to_string();
    let lookup = tokio::task::spawn_blocking(move || {
        use std::net::ToSocketAddrs;
        format!("{host}:0")
            .to_socket_addrs()
            .map(|mut addrs| addrs.next())
    })
    .await;

    match lookup {
        Ok(Ok(Some(addr))) => Some(addr.ip()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn probe() -> NetworkProbe {
        NetworkProbe::new(Duration::from_millis(500), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn check_port_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(probe().check_port("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn check_port_fails_on_refused_connection() {
        // Port 1 is essentially never bound in test environments.
        assert!(!probe().check_port("127.0.0.1", 1).await);
    }

    #[tokio::test]
    async fn ping_unresolvable_host_is_negative() {
        // `.invalid` is reserved and never resolves (RFC 2606).
        let (online, rtt) = probe().ping("host.invalid", 80).await;
        assert!(!online);
        assert_eq!(rtt, None);
    }

    #[tokio::test]
    async fn comprehensive_check_reports_open_local_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = probe().check_comprehensive("127.0.0.1", port).await;
        assert!(outcome.port_open);
        assert!(outcome.is_online);
        assert!(outcome.is_healthy());
    }

    #[tokio::test]
    async fn comprehensive_check_is_bounded_for_unroutable_target() {
        let start = Instant::now();
        let outcome = probe().check_comprehensive("host.invalid", 65000).await;

        assert!(!outcome.is_online);
        assert!(!outcome.port_open);
        assert!(!outcome.is_healthy());
        // Both sub-checks run concurrently under their own timeouts.
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
