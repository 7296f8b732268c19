//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport implementations for messaging layers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Transport layer for R-EMS messaging sockets.
//!
//! A transport opens listeners and dials peers; both produce [`Connection`]s
//! that move [`Frame`]s (opaque body plus an optional correlation id) with
//! explicit timeouts. Two bindings ship with the crate: an in-process channel
//! transport (`inproc://`) and TCP (`tcp://`).
#![warn(missing_docs)]

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod address;
pub mod error;
pub mod frame;
pub mod inproc;
pub mod tcp;

pub use address::Address;
pub use error::{Result, TransportError};
pub use frame::{CorrelationId, Frame, MAX_FRAME_LEN};
pub use inproc::{InProcConnection, InProcTransport};
pub use tcp::TcpTransport;

/// One established link to a peer.
///
/// `send` and `receive` may run concurrently from different tasks; `close`
/// wakes any pending call with [`TransportError::ConnectionClosed`].
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Queue a frame for the peer, waiting at most `timeout` for capacity.
    ///
    /// A frame is never left half-delivered: if the deadline or a close
    /// interrupts a partly written frame, the link is closed and the call
    /// returns [`TransportError::ConnectionClosed`].
    async fn send(&self, frame: Frame, timeout: Option<Duration>) -> Result<()>;
    /// Wait at most `timeout` for the next frame from the peer.
    async fn receive(&self, timeout: Option<Duration>) -> Result<Frame>;
    /// Close the link. Idempotent.
    async fn close(&self);
    /// Human-readable description of the remote end.
    fn remote(&self) -> &str;
}

/// Bound endpoint producing inbound connections.
#[async_trait]
pub trait Listener: Send + Sync + fmt::Debug {
    /// Wait at most `timeout` for the next inbound connection.
    async fn accept(&self, timeout: Option<Duration>) -> Result<Box<dyn Connection>>;
    /// Effective bound address (TCP listeners report the resolved port).
    fn address(&self) -> &Address;
    /// Stop listening and release the address.
    async fn close(&self);
}

/// Factory for listeners and outbound connections of one address scheme.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Scheme handled by this transport.
    fn name(&self) -> &'static str;
    /// Bind a listener on `address`.
    async fn listen(&self, address: &Address) -> Result<Box<dyn Listener>>;
    /// Connect to a listener at `address`.
    async fn dial(&self, address: &Address) -> Result<Box<dyn Connection>>;
}

/// Resolve the bundled transport responsible for an address scheme.
pub fn transport_for(address: &Address) -> Arc<dyn Transport> {
    match address {
        Address::InProc(_) => Arc::new(InProcTransport::new()),
        Address::Tcp(_) => Arc::new(TcpTransport::new()),
    }
}

/// Run `fut` under an optional deadline; `None` waits indefinitely.
pub(crate) async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(TransportError::Timeout)),
        None => fut.await,
    }
}

/// Resolve once `flag` flips to `true` (or its sender is dropped).
pub(crate) async fn closed_signal(flag: &tokio::sync::watch::Sender<bool>) {
    let mut rx = flag.subscribe();
    let _ = rx.wait_for(|closed| *closed).await;
}
