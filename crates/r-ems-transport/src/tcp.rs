//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport implementations for messaging layers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! TCP transport using the length-prefixed frame encoding from [`crate::frame`].
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::debug;

use crate::{
    closed_signal, with_timeout, Address, Connection, Frame, Listener, Result, Transport,
    TransportError,
};

/// Transport for `tcp://host:port` addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Construct the TCP transport.
    pub fn new() -> Self {
        Self
    }
}

fn host_port(address: &Address) -> Result<String> {
    match address {
        Address::Tcp(target) => Ok(match target.strip_prefix("*:") {
            Some(port) => format!("0.0.0.0:{port}"),
            None => target.clone(),
        }),
        other => Err(TransportError::InvalidAddress(other.to_string())),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn listen(&self, address: &Address) -> Result<Box<dyn Listener>> {
        let bind = host_port(address)?;
        let listener = TcpListener::bind(&bind).await.map_err(|err| match err.kind() {
            io::ErrorKind::AddrInUse => TransportError::AddressInUse(address.to_string()),
            _ => TransportError::Io(err),
        })?;
        let bound = Address::Tcp(listener.local_addr()?.to_string());
        debug!(address = %bound, "tcp listener bound");
        Ok(Box::new(TcpListenerHandle {
            address: bound,
            listener,
            shutdown: watch::Sender::new(false),
        }))
    }

    async fn dial(&self, address: &Address) -> Result<Box<dyn Connection>> {
        let target = host_port(address)?;
        let stream = TcpStream::connect(&target)
            .await
            .map_err(|err| match err.kind() {
                io::ErrorKind::ConnectionRefused => {
                    TransportError::ConnectionRefused(address.to_string())
                }
                _ => TransportError::from(err),
            })?;
        Ok(Box::new(TcpConnection::new(stream, address.to_string())?))
    }
}

/// Bound TCP listener.
#[derive(Debug)]
pub struct TcpListenerHandle {
    address: Address,
    listener: TcpListener,
    shutdown: watch::Sender<bool>,
}

#[async_trait]
impl Listener for TcpListenerHandle {
    async fn accept(&self, timeout: Option<Duration>) -> Result<Box<dyn Connection>> {
        if *self.shutdown.borrow() {
            return Err(TransportError::ListenerClosed);
        }
        let (stream, peer) = tokio::select! {
            biased;
            _ = closed_signal(&self.shutdown) => return Err(TransportError::ListenerClosed),
            accepted = with_timeout(timeout, async {
                self.listener.accept().await.map_err(TransportError::from)
            }) => accepted?,
        };
        Ok(Box::new(TcpConnection::new(stream, format!("tcp://{peer}"))?))
    }

    fn address(&self) -> &Address {
        &self.address
    }

    async fn close(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Read half plus the bytes received but not yet decoded. Keeping the
/// buffer across calls lets a timed-out `receive` resume mid-frame.
#[derive(Debug)]
struct ReadState {
    half: OwnedReadHalf,
    buffer: BytesMut,
}

/// Framed TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    remote: String,
    reader: Mutex<ReadState>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    shutdown: watch::Sender<bool>,
}

impl TcpConnection {
    fn new(stream: TcpStream, remote: String) -> Result<Self> {
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok(Self {
            remote,
            reader: Mutex::new(ReadState {
                half: read,
                buffer: BytesMut::new(),
            }),
            writer: Mutex::new(Some(write)),
            shutdown: watch::Sender::new(false),
        })
    }
}

/// Write `encoded` from offset `*written`, advancing it as bytes leave.
async fn write_frame(
    stream: &mut OwnedWriteHalf,
    encoded: &[u8],
    written: &mut usize,
) -> Result<()> {
    while *written < encoded.len() {
        let n = stream.write(&encoded[*written..]).await?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        *written += n;
    }
    stream.flush().await?;
    Ok(())
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&self, frame: Frame, timeout: Option<Duration>) -> Result<()> {
        let mut encoded = BytesMut::new();
        frame.encode(&mut encoded)?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let mut writer = tokio::select! {
            biased;
            _ = closed_signal(&self.shutdown) => return Err(TransportError::ConnectionClosed),
            guard = with_timeout(timeout, async { Ok(self.writer.lock().await) }) => guard?,
        };
        let stream = writer.as_mut().ok_or(TransportError::ConnectionClosed)?;
        let remaining =
            deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let mut written = 0usize;
        let outcome = tokio::select! {
            biased;
            _ = closed_signal(&self.shutdown) => Err(TransportError::ConnectionClosed),
            result = with_timeout(remaining, write_frame(stream, &encoded, &mut written)) => result,
        };

        if outcome.is_err() && written > 0 && written < encoded.len() {
            // The peer already holds part of this frame; nothing sent after
            // it could be decoded, so the link is torn down.
            debug!(
                remote = %self.remote,
                written,
                frame_len = encoded.len(),
                "send interrupted mid-frame; closing connection"
            );
            self.shutdown.send_replace(true);
            if let Some(mut half) = writer.take() {
                let _ = half.shutdown().await;
            }
            return Err(TransportError::ConnectionClosed);
        }
        outcome
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Frame> {
        tokio::select! {
            biased;
            _ = closed_signal(&self.shutdown) => Err(TransportError::ConnectionClosed),
            frame = with_timeout(timeout, async {
                let mut guard = self.reader.lock().await;
                let ReadState { half, buffer } = &mut *guard;
                loop {
                    if let Some(frame) = Frame::decode(buffer)? {
                        return Ok(frame);
                    }
                    if half.read_buf(buffer).await? == 0 {
                        return Err(TransportError::ConnectionClosed);
                    }
                }
            }) => frame,
        }
    }

    async fn close(&self) {
        self.shutdown.send_replace(true);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    fn remote(&self) -> &str {
        &self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_exchange_with_correlation() {
        let transport = TcpTransport::new();
        let listener = transport
            .listen(&"tcp://127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let bound = listener.address().clone();
        let dialed = transport.dial(&bound).await.unwrap();
        let accepted = listener
            .accept(Some(Duration::from_secs(2)))
            .await
            .unwrap();

        let id = crate::CorrelationId::new();
        dialed
            .send(Frame::new("request").with_correlation(id), None)
            .await
            .unwrap();
        let frame = accepted.receive(Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(frame.correlation, Some(id));
        assert_eq!(&frame.body[..], b"request");
    }

    #[tokio::test]
    async fn closed_peer_surfaces_connection_closed() {
        let transport = TcpTransport::new();
        let listener = transport
            .listen(&"tcp://127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let dialed = transport.dial(listener.address()).await.unwrap();
        let accepted = listener.accept(None).await.unwrap();
        dialed.close().await;
        let err = accepted.receive(Some(Duration::from_secs(2))).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn accept_times_out_without_dialers() {
        let listener = TcpTransport::new()
            .listen(&"tcp://127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let err = listener
            .accept(Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[tokio::test]
    async fn interrupted_send_closes_instead_of_tearing_the_stream() {
        let transport = TcpTransport::new();
        let listener = transport
            .listen(&"tcp://127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let dialed = transport.dial(listener.address()).await.unwrap();
        let accepted = listener.accept(Some(Duration::from_secs(2))).await.unwrap();

        let bulk = Frame::new(vec![7u8; 12 * 1024 * 1024]);
        let err = dialed
            .send(bulk, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed), "{err}");

        let err = dialed.send(Frame::new("after"), None).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));

        // The receiver sees the link end; it never decodes a torn frame.
        let mut outcome = accepted.receive(Some(Duration::from_secs(2))).await;
        while let Ok(frame) = &outcome {
            assert_ne!(&frame.body[..], b"after");
            outcome = accepted.receive(Some(Duration::from_secs(2))).await;
        }
        assert!(matches!(outcome, Err(TransportError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn receive_timeout_resumes_mid_frame() {
        let transport = TcpTransport::new();
        let listener = transport
            .listen(&"tcp://127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut raw = TcpStream::connect(listener.address().target()).await.unwrap();
        let accepted = listener.accept(Some(Duration::from_secs(2))).await.unwrap();

        let mut encoded = BytesMut::new();
        Frame::new("split-body").encode(&mut encoded).unwrap();
        let (head, tail) = encoded.split_at(7);
        raw.write_all(head).await.unwrap();
        let err = accepted
            .receive(Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));

        raw.write_all(tail).await.unwrap();
        let frame = accepted.receive(Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(&frame.body[..], b"split-body");
    }
}
