//! The two-stage prober and its concurrency cap.

use crate::content::content_check;
use crate::tls::insecure_client_config;
use serde::Deserialize;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Final outcome of one probe invocation. Never retried by the prober;
/// callers decide whether to re-probe later, subject to the classifier's
/// recurrence window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// The domain answered, or failed in a way that is not blocking
    Reachable,
    /// Path-level interference or origin-side geo/legal restriction
    Blocked,
}

/// Prober configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-stage timeout in seconds
    pub check_timeout_secs: u64,
    /// Port for the stage-1 TCP connect
    pub check_port: u16,
    /// Global cap on simultaneous probes
    pub max_concurrent_checks: usize,
    /// User agent presented by the content check
    pub user_agent: String,
    /// How much of a 403 body to inspect for block indicators
    pub body_probe_limit: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            check_timeout_secs: 3,
            check_port: 443,
            max_concurrent_checks: 5,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)".to_string(),
            body_probe_limit: 4096,
        }
    }
}

impl ProbeConfig {
    /// Per-stage timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

/// Probe counters.
#[derive(Debug, Default)]
pub struct ProbeStats {
    probes_run: AtomicU64,
    blocked_verdicts: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ProbeStats {
    fn enter(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    fn exit(&self, verdict: ProbeVerdict) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.probes_run.fetch_add(1, Ordering::Relaxed);
        if verdict == ProbeVerdict::Blocked {
            self.blocked_verdicts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn probes_run(&self) -> u64 {
        self.probes_run.load(Ordering::Relaxed)
    }

    pub fn blocked_verdicts(&self) -> u64 {
        self.blocked_verdicts.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Something that can probe a domain. The pipeline is generic over this
/// seam so tests can script verdicts without touching the network.
pub trait AvailabilityProbe {
    fn probe(&self, domain: &str) -> impl Future<Output = ProbeVerdict> + Send;
}

/// The real two-stage prober.
///
/// Cheap to clone; all clones share one permit pool, one TLS config, and
/// one set of counters.
#[derive(Clone)]
pub struct Prober {
    config: Arc<ProbeConfig>,
    permits: Arc<Semaphore>,
    tls: Arc<rustls::ClientConfig>,
    stats: Arc<ProbeStats>,
}

impl Prober {
    pub fn new(config: ProbeConfig) -> Self {
        info!(
            "prober ready (timeout {}s, port {}, {} concurrent)",
            config.check_timeout_secs, config.check_port, config.max_concurrent_checks
        );

        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_checks)),
            tls: Arc::new(insecure_client_config()),
            config: Arc::new(config),
            stats: Arc::new(ProbeStats::default()),
        }
    }

    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    /// Stop admitting new probes. In-flight probes still run to completion
    /// within their own timeout bounds.
    pub fn close(&self) {
        self.permits.close();
    }

    async fn check(&self, domain: &str) -> ProbeVerdict {
        let timeout = self.config.timeout();

        // Stage 1: TCP reachability.
        let connect = TcpStream::connect((domain, self.config.check_port));
        let outcome = tokio::time::timeout(timeout, connect).await;
        let stream = match classify_stage1(domain, outcome) {
            Ok(stream) => stream,
            Err(verdict) => return verdict,
        };

        // Stage 2: content heuristic, same timeout budget.
        match tokio::time::timeout(timeout, content_check(domain, stream, self.tls.clone(), &self.config)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                // Stage 1 already proved connectivity; a transport failure
                // here is not blocking evidence.
                debug!("{}: content check failed ({}), reachable", domain, e);
                ProbeVerdict::Reachable
            }
            Err(_) => {
                debug!("{}: content check timed out, reachable", domain);
                ProbeVerdict::Reachable
            }
        }
    }
}

impl AvailabilityProbe for Prober {
    async fn probe(&self, domain: &str) -> ProbeVerdict {
        // Backpressure is purely a wait: callers beyond the cap queue here.
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            // Pool closed: shutting down, nothing left to probe.
            Err(_) => return ProbeVerdict::Reachable,
        };

        self.stats.enter();
        let verdict = self.check(domain).await;
        self.stats.exit(verdict);

        debug!("{}: verdict {:?}", domain, verdict);
        verdict
    }
}

/// Map the stage-1 connect outcome to either a usable stream or an early
/// verdict. A timed-out connect or a reset during connect is
/// deep-packet-inspection interference; resolution failures, refusals, and
/// other OS errors are not observable blocking at this layer.
fn classify_stage1(
    domain: &str,
    outcome: Result<std::io::Result<TcpStream>, tokio::time::error::Elapsed>,
) -> Result<TcpStream, ProbeVerdict> {
    match outcome {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => {
            let verdict = if e.kind() == ErrorKind::ConnectionReset {
                ProbeVerdict::Blocked
            } else {
                ProbeVerdict::Reachable
            };
            debug!("{}: connect failed ({}), {:?}", domain, e, verdict);
            Err(verdict)
        }
        Err(_) => {
            debug!("{}: connect timed out, blocked", domain);
            Err(ProbeVerdict::Blocked)
        }
    }
}
