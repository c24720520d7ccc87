//! Live bindability probe
//!
//! A probe answers one question: can a listener be bound to `(host, port)`
//! right now? It never fails. Bind errors and timeouts both read as "not
//! available". The listener is dropped (closed) before the answer is returned.

use async_trait::async_trait;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::debug;

use crate::config::DEFAULT_PROBE_TIMEOUT_MS;

/// Loopback host used when none is configured
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Probe seam. The engine only ever talks to this trait, so tests can
/// substitute a scripted view of OS port occupancy.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Returns true if `port` can currently be bound on `host`
    async fn probe(&self, port: u16, host: IpAddr) -> bool;
}

/// Probe backed by a real tokio `TcpListener` bind, bounded by a timeout
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        TcpProbe { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        TcpProbe::new(Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS))
    }
}

/// Resolve a bind attempt to a yes/no answer under a ceiling.
///
/// An error or a timeout both read as `false`. On timeout `fut` is dropped,
/// which closes any socket it had opened.
pub async fn bounded<F, T, E>(port: u16, fut: F, timeout: Duration) -> bool
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(bound)) => {
            drop(bound);
            true
        }
        Ok(Err(e)) => {
            debug!(port, error = %e, "probe bind failed");
            false
        }
        Err(_) => {
            debug!(port, timeout_ms = timeout.as_millis() as u64, "probe timed out");
            false
        }
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn probe(&self, port: u16, host: IpAddr) -> bool {
        bounded(port, TcpListener::bind(SocketAddr::new(host, port)), self.timeout).await
    }
}
