//! geogate
//!
//! Watches name-resolution traffic on the host, probes domains that look
//! unreachable, and routes blocked-domain decisions into the proxy rule
//! file. The moving parts:
//!
//! - `geogate-capture` turns a tcpdump feed into domain events
//! - `geogate-filter` decides which events merit a probe
//! - `geogate-probe` runs the two-stage reachability check
//! - this crate wires them together and talks to the outside world
//!   (decision dialog, rule file, remote sync, VPN service, extension API)

pub mod api;
pub mod collab;
pub mod config;
pub mod dispatch;
pub mod pipeline;
