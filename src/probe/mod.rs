//! Probe module for network monitoring.
//!
//! Both probe kinds connect over TCP. Failures are outcomes, not errors:
//! [`run_probe`] never returns an error to its caller.

mod tcp;

pub use tcp::*;

use crate::db::ProbeKind;

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default connect timeout for every probe kind.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Latency reported for an unreachable target.
pub const UNREACHABLE_LATENCY_MS: i64 = -1;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("DNS resolution failed: {0}")]
    Resolve(String),
    #[error("network error: {0}")]
    Network(String),
}

/// A single probe to execute.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub address: String,
    pub port: u16,
    pub kind: ProbeKind,
    pub timeout: Duration,
}

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub reachable: bool,
    /// Milliseconds from dispatch to connect, or `UNREACHABLE_LATENCY_MS`.
    pub latency_ms: i64,
}

impl ProbeOutcome {
    pub fn reachable(latency: Duration) -> Self {
        Self {
            reachable: true,
            latency_ms: latency.as_millis().min(i64::MAX as u128) as i64,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            latency_ms: UNREACHABLE_LATENCY_MS,
        }
    }
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = ProbeOutcome> + Send>>;

/// Executes probes on behalf of the scheduler.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, request: ProbeRequest) -> ProbeFuture;
}

impl<F, Fut> Prober for F
where
    F: Fn(ProbeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProbeOutcome> + Send + 'static,
{
    fn probe(&self, request: ProbeRequest) -> ProbeFuture {
        Box::pin(self(request))
    }
}

/// The production prober: a real TCP connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkProber;

impl Prober for NetworkProber {
    fn probe(&self, request: ProbeRequest) -> ProbeFuture {
        Box::pin(async move {
            // Spread out targets that were started together
            let jitter = rand::random::<u64>() % 100;
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            run_probe(&request).await
        })
    }
}

/// Run a probe with the given request, folding every error into an
/// unreachable outcome.
pub async fn run_probe(request: &ProbeRequest) -> ProbeOutcome {
    let start = Instant::now();

    let result = match request.kind {
        ProbeKind::Reachability | ProbeKind::MailServerCheck => {
            run_tcp_probe(&request.address, request.port, request.timeout).await
        }
    };

    match result {
        Ok(()) => ProbeOutcome::reachable(start.elapsed()),
        Err(e) => {
            tracing::debug!(
                "Probe {} {}:{} failed: {}",
                request.kind,
                request.address,
                request.port,
                e
            );
            ProbeOutcome::unreachable()
        }
    }
}
