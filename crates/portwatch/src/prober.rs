//! Reachability probes.
//!
//! A probe is a bare TCP connect followed by an immediate close. No bytes
//! are written or read. The outcome distinguishes an active refusal from
//! every other failure so the scheduler can apply its unreachable policy.

use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tracing::trace;

use crate::target::TargetId;

/// Default bound on a single connect attempt.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Boxed future alias for probe results.
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeOutcome> + Send + 'a>>;

/// Result of a single reachability attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The endpoint accepted the connection.
    Reachable,
    /// The endpoint actively refused the connection.
    Refused,
    /// Anything else: DNS failure, timeout, unreachable network.
    Unreachable { reason: String },
}

/// Performs reachability attempts — injected into the monitor for testability.
pub trait Prober: Send + Sync {
    /// Attempt one connection to `target`. Must not retry.
    fn probe<'a>(&'a self, target: &'a TargetId) -> ProbeFuture<'a>;
}

/// Production prober: a tokio TCP connect bounded by a timeout.
#[derive(Debug, Clone)]
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    /// Prober whose connect attempts give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Connect timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl Prober for TcpProber {
    fn probe<'a>(&'a self, target: &'a TargetId) -> ProbeFuture<'a> {
        Box::pin(tcp_probe(target, self.timeout))
    }
}

/// Open and immediately close a TCP connection to `target`.
pub async fn tcp_probe(target: &TargetId, timeout: Duration) -> ProbeOutcome {
    let connect = TcpStream::connect((target.host(), target.port()));

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => {
            // Dropping the stream closes the connection.
            drop(stream);
            trace!(addr = %target, "probe connected");
            ProbeOutcome::Reachable
        }
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
            trace!(addr = %target, "probe refused");
            ProbeOutcome::Refused
        }
        Ok(Err(e)) => {
            trace!(addr = %target, error = %e, "probe failed");
            ProbeOutcome::Unreachable {
                reason: e.to_string(),
            }
        }
        Err(_) => {
            trace!(addr = %target, ?timeout, "probe timed out");
            ProbeOutcome::Unreachable {
                reason: format!("connection timed out after {timeout:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn probe_listening_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = TcpProber::default()
            .probe(&TargetId::new("127.0.0.1", port))
            .await;
        assert_eq!(outcome, ProbeOutcome::Reachable);
    }

    #[tokio::test]
    async fn probe_closed_port_is_refused() {
        let port = closed_port().await;
        let outcome = tcp_probe(&TargetId::new("127.0.0.1", port), Duration::from_secs(1)).await;
        assert_eq!(outcome, ProbeOutcome::Refused);
    }

    #[tokio::test]
    async fn probe_unresolvable_host_is_unreachable() {
        let outcome = tcp_probe(
            &TargetId::new("portwatch.invalid", 80),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(outcome, ProbeOutcome::Unreachable { .. }));
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_string(&ProbeOutcome::Unreachable {
            reason: "timed out".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"outcome":"unreachable","reason":"timed out"}"#);
        assert_eq!(
            serde_json::to_string(&ProbeOutcome::Refused).unwrap(),
            r#"{"outcome":"refused"}"#
        );
    }
}
