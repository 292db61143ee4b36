//! Wire formats the gateway reads and rewrites
//!
//! Parsers are zero-copy views over the frame buffer; builders produce
//! owned byte vectors.

pub mod checksum;
pub mod ethernet;
pub mod icmp;
pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;
pub mod types;

pub use types::*;
