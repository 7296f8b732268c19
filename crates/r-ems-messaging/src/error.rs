//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_ems_transport::TransportError;

use crate::Topology;

/// Shared result type for socket operations.
pub type Result<T> = std::result::Result<T, SocketError>;

/// Typed outcome of a failed socket operation.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// No data, peer, or capacity within the deadline. Retry is expected.
    #[error("operation timed out")]
    Timeout,
    /// The socket was closed before or while the operation was pending.
    #[error("socket closed")]
    Closed,
    /// The only peer able to carry the operation went away.
    #[error("peer connection closed")]
    ConnectionClosed,
    /// Protocol invariant violated (outstanding request, unknown reply id).
    #[error("protocol state error: {0}")]
    State(&'static str),
    /// The operation is not part of the topology's contract.
    #[error("{operation} is not supported by {topology} sockets")]
    InvalidOperation {
        /// Socket topology.
        topology: Topology,
        /// Rejected operation name.
        operation: &'static str,
    },
    /// Socket options failed validation.
    #[error("invalid socket option: {0}")]
    InvalidOption(String),
    /// Transport failure while binding or dialing.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SocketError {
    /// True for the expected "nothing happened yet" outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SocketError::Timeout)
    }
}
