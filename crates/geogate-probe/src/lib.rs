//! geogate Availability Prober
//!
//! Two-stage reachability check under a global concurrency cap:
//! 1. TCP connect to the domain on port 443 with a fixed timeout.
//!    Timeout or reset means the path is interfered with.
//! 2. If the connection succeeds, a single HTTPS GET for `/` looking for
//!    origin-side geo/legal blocking signals (451, or 403 with a
//!    block-indicator phrase in the body).
//!
//! Certificate validation is disabled on purpose: the check targets
//! reachability and blocking signals, not certificate trust.

mod content;
mod prober;
mod tls;

pub use prober::{AvailabilityProbe, ProbeConfig, ProbeStats, ProbeVerdict, Prober};
