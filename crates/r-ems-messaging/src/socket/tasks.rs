//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Background units of a socket: accept loops, dial loops, and the reader
//! that moves frames from a connection into its registry inbox.
use std::sync::Arc;

use r_ems_logging::{ems_debug, ems_warn};
use r_ems_transport::{Address, Connection, Listener, Transport, TransportError};

use super::Shared;
use crate::registry::{PeerId, PeerRole};

pub(super) async fn accept_loop(shared: Arc<Shared>, listener: Box<dyn Listener>) {
    let address = listener.address().to_string();
    loop {
        let accepted = tokio::select! {
            _ = shared.closed() => break,
            accepted = listener.accept(None) => accepted,
        };
        match accepted {
            Ok(conn) => {
                let conn: Arc<dyn Connection> = Arc::from(conn);
                match shared.attach(conn.clone(), PeerRole::Accepted) {
                    Some(peer) => {
                        let handle = tokio::spawn(read_loop(shared.clone(), peer, conn));
                        shared.track(handle);
                    }
                    None => {
                        ems_debug!(
                            context = shared.context().with_address(&address),
                            "rejecting connection from {}: socket full",
                            conn.remote()
                        );
                        conn.close().await;
                    }
                }
            }
            Err(TransportError::Timeout) => continue,
            Err(TransportError::ListenerClosed) => break,
            Err(err) => {
                ems_warn!(
                    context = shared.context().with_address(&address),
                    "accept failed: {}",
                    err
                );
                tokio::select! {
                    _ = shared.closed() => break,
                    _ = tokio::time::sleep(shared.options.reconnect_interval) => {}
                }
            }
        }
    }
    listener.close().await;
    ems_debug!(
        context = shared.context().with_address(&address),
        "listener stopped"
    );
}

/// Keep one dialed connection alive until the socket closes, re-dialing
/// after `reconnect_interval` whenever it fails or drops.
pub(super) async fn dial_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>, address: Address) {
    let target = address.to_string();
    loop {
        let dialed = tokio::select! {
            _ = shared.closed() => break,
            dialed = transport.dial(&address) => dialed,
        };
        match dialed {
            Ok(conn) => {
                let conn: Arc<dyn Connection> = Arc::from(conn);
                match shared.attach(conn.clone(), PeerRole::Dialed) {
                    Some(peer) => read_loop(shared.clone(), peer, conn).await,
                    None => conn.close().await,
                }
            }
            Err(err) => {
                ems_debug!(
                    context = shared.context().with_address(&target),
                    "dial failed: {}; retrying",
                    err
                );
            }
        }
        tokio::select! {
            _ = shared.closed() => break,
            _ = tokio::time::sleep(shared.options.reconnect_interval) => {}
        }
    }
}

pub(super) async fn read_loop(shared: Arc<Shared>, peer: PeerId, conn: Arc<dyn Connection>) {
    loop {
        let received = tokio::select! {
            _ = shared.closed() => break,
            received = conn.receive(None) => received,
        };
        match received {
            Ok(frame) => {
                if !shared.enqueue(peer, frame).await {
                    break;
                }
            }
            Err(TransportError::Timeout) => continue,
            Err(err) => {
                if !err.is_disconnect() {
                    ems_warn!(
                        context = shared.context().with_peer(peer.get()),
                        "receive failed: {}",
                        err
                    );
                }
                break;
            }
        }
    }
    shared.retire_peer(peer).await;
}
