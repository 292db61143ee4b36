//! natgate - ICMP/ICMPv6 fast path of a stateful NAT gateway
//!
//! Echo requests for the gateway's own addresses are answered in the fast
//! path, Neighbor Discovery is handled per port, and traffic belonging to
//! flows the gateway does not track is handed to a fallback interface.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
