//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Ordered set of a socket's live connections with per-connection inboxes.
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use r_ems_transport::{Connection, Frame};

/// Identifier of one peer link, unique within its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Numeric value, used in logs and metrics.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// How the link was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Produced by one of the socket's listeners.
    Accepted,
    /// Produced by one of the socket's dialers.
    Dialed,
}

/// Public view of a registered peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer identifier.
    pub id: PeerId,
    /// Accepted or dialed.
    pub role: PeerRole,
    /// Remote description reported by the transport.
    pub remote: String,
    /// Last time a frame moved in either direction.
    pub last_activity: Instant,
}

struct Peer {
    id: PeerId,
    role: PeerRole,
    remote: String,
    conn: Arc<dyn Connection>,
    inbox: VecDeque<Frame>,
    alive: bool,
    last_activity: Instant,
}

/// Result of handing an inbound frame to the registry.
#[derive(Debug)]
pub(crate) enum Inbound {
    Queued,
    /// Inbox at capacity; the frame is handed back.
    Full(Frame),
    /// Peer no longer registered.
    Gone,
}

/// Connections in insertion order. Dead peers stay until their inbox is
/// drained so frames that arrived before a disconnect are still delivered.
pub(crate) struct Registry {
    peers: Vec<Peer>,
    next_id: u64,
    cursor: usize,
    capacity: Option<usize>,
    inbox_limit: usize,
}

impl Registry {
    pub(crate) fn new(capacity: Option<usize>, inbox_limit: usize) -> Self {
        Self {
            peers: Vec::new(),
            next_id: 1,
            cursor: 0,
            capacity,
            inbox_limit: inbox_limit.max(1),
        }
    }

    /// Register a connection, or return `None` when the live-peer cap is hit.
    pub(crate) fn insert(
        &mut self,
        conn: Arc<dyn Connection>,
        role: PeerRole,
        remote: String,
    ) -> Option<PeerId> {
        if let Some(cap) = self.capacity {
            if self.live_count() >= cap {
                return None;
            }
        }
        let id = PeerId(self.next_id);
        self.next_id += 1;
        self.peers.push(Peer {
            id,
            role,
            remote,
            conn,
            inbox: VecDeque::new(),
            alive: true,
            last_activity: Instant::now(),
        });
        Some(id)
    }

    /// Mark a peer dead. Returns its connection the first time so the caller
    /// can close it outside the lock.
    pub(crate) fn mark_dead(&mut self, id: PeerId) -> Option<Arc<dyn Connection>> {
        let idx = self.position(id)?;
        let peer = &mut self.peers[idx];
        if !peer.alive {
            return None;
        }
        peer.alive = false;
        let conn = peer.conn.clone();
        if peer.inbox.is_empty() {
            self.remove_at(idx);
        }
        Some(conn)
    }

    /// Remove every peer, returning the connections that were still live.
    pub(crate) fn drain(&mut self) -> Vec<Arc<dyn Connection>> {
        self.cursor = 0;
        self.peers
            .drain(..)
            .filter(|p| p.alive)
            .map(|p| p.conn)
            .collect()
    }

    /// Registered (live or draining) peer.
    pub(crate) fn contains(&self, id: PeerId) -> bool {
        self.position(id).is_some()
    }

    pub(crate) fn live_ids(&self) -> Vec<PeerId> {
        self.peers.iter().filter(|p| p.alive).map(|p| p.id).collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.peers.iter().filter(|p| p.alive).count()
    }

    pub(crate) fn connection(&self, id: PeerId) -> Option<Arc<dyn Connection>> {
        self.position(id)
            .map(|idx| &self.peers[idx])
            .filter(|p| p.alive)
            .map(|p| p.conn.clone())
    }

    pub(crate) fn touch(&mut self, id: PeerId) {
        if let Some(idx) = self.position(id) {
            self.peers[idx].last_activity = Instant::now();
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .filter(|p| p.alive)
            .map(|p| PeerInfo {
                id: p.id,
                role: p.role,
                remote: p.remote.clone(),
                last_activity: p.last_activity,
            })
            .collect()
    }

    pub(crate) fn push_inbound(&mut self, id: PeerId, frame: Frame) -> Inbound {
        let Some(idx) = self.position(id) else {
            return Inbound::Gone;
        };
        let limit = self.inbox_limit;
        let peer = &mut self.peers[idx];
        if !peer.alive {
            return Inbound::Gone;
        }
        if peer.inbox.len() >= limit {
            return Inbound::Full(frame);
        }
        peer.inbox.push_back(frame);
        peer.last_activity = Instant::now();
        Inbound::Queued
    }

    /// Pop the next inbound frame, rotating across peers so none starves.
    pub(crate) fn next_inbound(&mut self) -> Option<(PeerId, Frame)> {
        let len = self.peers.len();
        for step in 0..len {
            let idx = (self.cursor + step) % len;
            let Some(frame) = self.peers[idx].inbox.pop_front() else {
                continue;
            };
            let id = self.peers[idx].id;
            if !self.peers[idx].alive && self.peers[idx].inbox.is_empty() {
                self.remove_at(idx);
                self.cursor = idx;
            } else {
                self.cursor = idx + 1;
            }
            return Some((id, frame));
        }
        None
    }

    fn position(&self, id: PeerId) -> Option<usize> {
        self.peers.iter().position(|p| p.id == id)
    }

    fn remove_at(&mut self, idx: usize) {
        self.peers.remove(idx);
        if self.cursor > idx {
            self.cursor -= 1;
        }
        if self.cursor >= self.peers.len() {
            self.cursor = 0;
        }
    }
}
