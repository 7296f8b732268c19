//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport implementations for messaging layers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! In-process transport backed by bounded tokio channels.
//!
//! Listeners register under their name in a process-wide table; dialing a
//! name creates a pair of channels and hands one end to the listener.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::{
    closed_signal, with_timeout, Address, Connection, Frame, Listener, Result, Transport,
    TransportError,
};

/// Frames buffered per direction before `send` starts waiting.
pub const CHANNEL_CAPACITY: usize = 64;
const BACKLOG: usize = 16;

static REGISTRY: Lazy<InProcRegistry> = Lazy::new(InProcRegistry::default);

struct Registration {
    id: u64,
    backlog: mpsc::Sender<InProcConnection>,
}

#[derive(Default)]
struct InProcRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Registration>>,
}

impl InProcRegistry {
    fn register(&self, name: &str) -> Result<(u64, mpsc::Receiver<InProcConnection>)> {
        let mut listeners = self.listeners.lock();
        if let Some(existing) = listeners.get(name) {
            if !existing.backlog.is_closed() {
                return Err(TransportError::AddressInUse(format!("inproc://{name}")));
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(BACKLOG);
        listeners.insert(name.to_owned(), Registration { id, backlog: tx });
        Ok((id, rx))
    }

    fn unregister(&self, name: &str, id: u64) {
        let mut listeners = self.listeners.lock();
        if listeners.get(name).map(|r| r.id) == Some(id) {
            listeners.remove(name);
        }
    }

    fn backlog(&self, name: &str) -> Option<mpsc::Sender<InProcConnection>> {
        self.listeners.lock().get(name).map(|r| r.backlog.clone())
    }
}

/// Transport for `inproc://` addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcTransport;

impl InProcTransport {
    /// Handle to the process-wide in-process namespace.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for InProcTransport {
    fn name(&self) -> &'static str {
        "inproc"
    }

    async fn listen(&self, address: &Address) -> Result<Box<dyn Listener>> {
        let Address::InProc(name) = address else {
            return Err(TransportError::InvalidAddress(address.to_string()));
        };
        let (id, backlog) = REGISTRY.register(name)?;
        debug!(address = %address, "inproc listener registered");
        Ok(Box::new(InProcListener {
            address: address.clone(),
            name: name.clone(),
            id,
            backlog: tokio::sync::Mutex::new(backlog),
            shutdown: watch::Sender::new(false),
        }))
    }

    async fn dial(&self, address: &Address) -> Result<Box<dyn Connection>> {
        let Address::InProc(name) = address else {
            return Err(TransportError::InvalidAddress(address.to_string()));
        };
        let backlog = REGISTRY
            .backlog(name)
            .ok_or_else(|| TransportError::ConnectionRefused(address.to_string()))?;
        let (local, remote) = InProcConnection::pair(name);
        backlog
            .try_send(remote)
            .map_err(|_| TransportError::ConnectionRefused(address.to_string()))?;
        Ok(Box::new(local))
    }
}

/// Listener half of an `inproc://` endpoint.
#[derive(Debug)]
pub struct InProcListener {
    address: Address,
    name: String,
    id: u64,
    backlog: tokio::sync::Mutex<mpsc::Receiver<InProcConnection>>,
    shutdown: watch::Sender<bool>,
}

#[async_trait]
impl Listener for InProcListener {
    async fn accept(&self, timeout: Option<Duration>) -> Result<Box<dyn Connection>> {
        let mut backlog = self.backlog.lock().await;
        tokio::select! {
            biased;
            _ = closed_signal(&self.shutdown) => Err(TransportError::ListenerClosed),
            accepted = with_timeout(timeout, async {
                backlog.recv().await.ok_or(TransportError::ListenerClosed)
            }) => accepted.map(|conn| Box::new(conn) as Box<dyn Connection>),
        }
    }

    fn address(&self) -> &Address {
        &self.address
    }

    async fn close(&self) {
        self.shutdown.send_replace(true);
        REGISTRY.unregister(&self.name, self.id);
    }
}

impl Drop for InProcListener {
    fn drop(&mut self) {
        REGISTRY.unregister(&self.name, self.id);
    }
}

/// One end of an in-process link.
#[derive(Debug)]
pub struct InProcConnection {
    remote: String,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Frame>>,
    shutdown: watch::Sender<bool>,
}

impl InProcConnection {
    /// Two connected ends outside any listener: `(dialer, accepted)`.
    pub fn pair(name: &str) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let dialer = Self {
            remote: format!("inproc://{name}"),
            outbound: Mutex::new(Some(a_tx)),
            inbound: tokio::sync::Mutex::new(b_rx),
            shutdown: watch::Sender::new(false),
        };
        let accepted = Self {
            remote: format!("inproc://{name}#dialer"),
            outbound: Mutex::new(Some(b_tx)),
            inbound: tokio::sync::Mutex::new(a_rx),
            shutdown: watch::Sender::new(false),
        };
        (dialer, accepted)
    }
}

#[async_trait]
impl Connection for InProcConnection {
    async fn send(&self, frame: Frame, timeout: Option<Duration>) -> Result<()> {
        let outbound = self
            .outbound
            .lock()
            .clone()
            .ok_or(TransportError::ConnectionClosed)?;
        tokio::select! {
            biased;
            _ = closed_signal(&self.shutdown) => Err(TransportError::ConnectionClosed),
            sent = with_timeout(timeout, async {
                outbound
                    .send(frame)
                    .await
                    .map_err(|_| TransportError::ConnectionClosed)
            }) => sent,
        }
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Frame> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = closed_signal(&self.shutdown) => Err(TransportError::ConnectionClosed),
            received = with_timeout(timeout, async {
                inbound.recv().await.ok_or(TransportError::ConnectionClosed)
            }) => received,
        }
    }

    async fn close(&self) {
        self.shutdown.send_replace(true);
        self.outbound.lock().take();
        if let Ok(mut inbound) = self.inbound.try_lock() {
            inbound.close();
        }
    }

    fn remote(&self) -> &str {
        &self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: &str) -> Address {
        Address::InProc(name.to_owned())
    }

    #[tokio::test]
    async fn dial_and_exchange_frames() {
        let transport = InProcTransport::new();
        let listener = transport.listen(&addr("inproc-exchange")).await.unwrap();
        let dialed = transport.dial(&addr("inproc-exchange")).await.unwrap();
        let accepted = listener
            .accept(Some(Duration::from_secs(1)))
            .await
            .unwrap();

        dialed.send(Frame::new("ping"), None).await.unwrap();
        let frame = accepted.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(&frame.body[..], b"ping");

        accepted.send(Frame::new("pong"), None).await.unwrap();
        let frame = dialed.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(&frame.body[..], b"pong");
    }

    #[tokio::test]
    async fn duplicate_listen_is_rejected_until_closed() {
        let transport = InProcTransport::new();
        let first = transport.listen(&addr("inproc-dup")).await.unwrap();
        let err = transport.listen(&addr("inproc-dup")).await.unwrap_err();
        assert!(matches!(err, TransportError::AddressInUse(_)));
        first.close().await;
        transport.listen(&addr("inproc-dup")).await.unwrap();
    }

    #[tokio::test]
    async fn dial_without_listener_is_refused() {
        let err = InProcTransport::new()
            .dial(&addr("inproc-nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));
    }

    #[tokio::test]
    async fn close_is_observed_by_peer() {
        let transport = InProcTransport::new();
        let listener = transport.listen(&addr("inproc-close")).await.unwrap();
        let dialed = transport.dial(&addr("inproc-close")).await.unwrap();
        let accepted = listener.accept(None).await.unwrap();

        dialed.close().await;
        let err = accepted.receive(Some(Duration::from_secs(1))).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
        let err = dialed.send(Frame::new("late"), None).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn receive_times_out_when_idle() {
        let transport = InProcTransport::new();
        let listener = transport.listen(&addr("inproc-idle")).await.unwrap();
        let _dialed = transport.dial(&addr("inproc-idle")).await.unwrap();
        let accepted = listener.accept(None).await.unwrap();
        let err = accepted
            .receive(Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }
}
