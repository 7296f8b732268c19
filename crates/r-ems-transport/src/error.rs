//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport implementations for messaging layers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::io;

/// Shared result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Failures surfaced by transports and their connections.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No data or capacity became available before the deadline.
    #[error("transport operation timed out")]
    Timeout,
    /// The remote side (or the local handle) closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
    /// The listener was closed while an accept was pending.
    #[error("listener closed")]
    ListenerClosed,
    /// The address could not be parsed or names an unknown scheme.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Another listener already owns the address.
    #[error("address already in use: {0}")]
    AddressInUse(String),
    /// Nothing is listening at the dialed address.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    /// A frame body exceeded the transport limit.
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Announced or actual body size.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// Wrapper for IO errors not covered by the variants above.
    #[error("io error: {0}")]
    Io(io::Error),
}

impl TransportError {
    /// True when the error means the peer link is gone for good.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionClosed | TransportError::ListenerClosed
        )
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => TransportError::ConnectionClosed,
            io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io(err),
        }
    }
}
