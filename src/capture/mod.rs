//! Frame I/O on gateway ports and fallback interfaces

mod af_packet;
mod backoff;

pub use af_packet::{interface_mac, AfPacketSocket};
pub use backoff::{RecvBackoff, MAX_CONSECUTIVE_ERRORS};

use crate::Result;
use std::future::Future;

/// A link the gateway reads frames from and writes frames to.
///
/// `recv` and `send` are called concurrently from different tasks.
pub trait Capture: Send + Sync {
    /// Receive one frame into `buf`, returning its length
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<usize>> + Send;
}
