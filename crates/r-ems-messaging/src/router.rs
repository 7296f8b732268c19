//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Outbound target selection per topology.
use crate::registry::PeerId;
use crate::Topology;

/// Routing policy of a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Router {
    /// The single peer of a pair socket.
    Single,
    /// Every live peer.
    Broadcast,
    /// One live peer per message, rotating.
    RoundRobin { next: usize },
    /// The peer a correlated request arrived on.
    Origin,
    /// Receive-only topologies.
    None,
}

/// Targets chosen for one outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    /// Deliver to all listed peers; an empty list drops the message.
    All(Vec<PeerId>),
    /// Deliver to exactly this peer.
    One(PeerId),
    /// No eligible peer yet.
    NoPeer,
}

impl Router {
    pub(crate) fn for_topology(topology: Topology) -> Self {
        match topology {
            Topology::Pair => Router::Single,
            Topology::Bus | Topology::Pub | Topology::Surveyor => Router::Broadcast,
            Topology::Push | Topology::Req => Router::RoundRobin { next: 0 },
            Topology::Rep | Topology::Respondent => Router::Origin,
            Topology::Pull | Topology::Sub => Router::None,
        }
    }

    /// Whether `send` should wait for a peer to appear instead of dropping.
    pub(crate) fn waits_for_peer(&self) -> bool {
        matches!(self, Router::Single | Router::RoundRobin { .. })
    }

    /// Pick targets among `live` peers (registry order). `origin` is the
    /// peer a correlated reply must return to.
    pub(crate) fn select(&mut self, live: &[PeerId], origin: Option<PeerId>) -> Route {
        match self {
            Router::Single => live.first().copied().map_or(Route::NoPeer, Route::One),
            Router::Broadcast => Route::All(live.to_vec()),
            Router::RoundRobin { next } => {
                if live.is_empty() {
                    return Route::NoPeer;
                }
                let idx = *next % live.len();
                *next = idx + 1;
                Route::One(live[idx])
            }
            Router::Origin => match origin {
                Some(peer) if live.contains(&peer) => Route::One(peer),
                _ => Route::NoPeer,
            },
            Router::None => Route::NoPeer,
        }
    }
}
