//! Crate-wide error type

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// natgate.toml could not be read or describes an unusable gateway
    #[error("configuration: {0}")]
    Config(String),

    /// A header failed to parse
    #[error("malformed packet: {0}")]
    Parse(String),

    #[error("no such interface: {name}")]
    InterfaceNotFound { name: String },

    /// A packet is in the wrong state for the requested operation
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// The packet pool could not provide a buffer; the process cannot continue
    #[error("out of packet buffers ({requested} bytes requested)")]
    BufferExhausted { requested: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
