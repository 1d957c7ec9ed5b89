//! geogate Capture Layer
//!
//! Turns a live packet-capture feed into a lazy, unbounded stream of
//! observed domain names:
//! 1. Spawn tcpdump on port 53 with line buffering
//! 2. Scan each line for a DNS question (`A?` / `AAAA?`)
//! 3. Yield normalized domain events, skip everything else

mod parser;
mod stream;

pub use parser::parse_query_line;
pub use stream::{CaptureConfig, CaptureError, CaptureSource, DomainEvent, DomainStream};
