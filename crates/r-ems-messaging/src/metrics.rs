//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

/// Point-in-time copy of a socket's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketStats {
    /// Messages handed to at least one connection.
    pub sent: u64,
    /// Messages returned to the caller.
    pub received: u64,
    /// Messages sent with no eligible peer.
    pub dropped: u64,
    /// Inbound frames rejected by filter or correlation.
    pub discarded: u64,
    /// Connections registered.
    pub peers_added: u64,
    /// Connections retired.
    pub peers_removed: u64,
}

/// Countable socket event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Sent,
    Received,
    Dropped,
    Discarded,
    PeerAdded,
    PeerRemoved,
}

impl Event {
    fn outcome(self) -> Option<&'static str> {
        match self {
            Event::Sent => Some("sent"),
            Event::Received => Some("received"),
            Event::Dropped => Some("dropped"),
            Event::Discarded => Some("discarded"),
            Event::PeerAdded | Event::PeerRemoved => None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
    peers_added: AtomicU64,
    peers_removed: AtomicU64,
}

impl Counters {
    fn slot(&self, event: Event) -> &AtomicU64 {
        match event {
            Event::Sent => &self.sent,
            Event::Received => &self.received,
            Event::Dropped => &self.dropped,
            Event::Discarded => &self.discarded,
            Event::PeerAdded => &self.peers_added,
            Event::PeerRemoved => &self.peers_removed,
        }
    }

    fn snapshot(&self) -> SocketStats {
        SocketStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            peers_added: self.peers_added.load(Ordering::Relaxed),
            peers_removed: self.peers_removed.load(Ordering::Relaxed),
        }
    }
}

/// Prometheus view of socket activity, shared by every socket built with it.
#[derive(Clone, Debug)]
pub struct SocketMetricsExporter {
    messages: IntCounterVec,
    peers: IntGaugeVec,
}

impl SocketMetricsExporter {
    /// Create the collectors and register them with `registry`.
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let messages = IntCounterVec::new(
            Opts::new(
                "r_ems_socket_messages_total",
                "Messages processed by messaging sockets, by outcome",
            ),
            &["socket", "topology", "outcome"],
        )?;
        registry.register(Box::new(messages.clone()))?;

        let peers = IntGaugeVec::new(
            Opts::new(
                "r_ems_socket_peers",
                "Live connections currently attached to a messaging socket",
            ),
            &["socket", "topology"],
        )?;
        registry.register(Box::new(peers.clone()))?;

        Ok(Self { messages, peers })
    }

    fn observe(&self, socket: &str, topology: &str, event: Event) {
        match event {
            Event::PeerAdded => self.peers.with_label_values(&[socket, topology]).inc(),
            Event::PeerRemoved => self.peers.with_label_values(&[socket, topology]).dec(),
            other => {
                if let Some(outcome) = other.outcome() {
                    self.messages
                        .with_label_values(&[socket, topology, outcome])
                        .inc();
                }
            }
        }
    }
}

/// Counters of one socket plus the optional exporter.
#[derive(Debug)]
pub(crate) struct SocketMetrics {
    socket: String,
    topology: &'static str,
    counters: Counters,
    exporter: Option<SocketMetricsExporter>,
}

impl SocketMetrics {
    pub(crate) fn new(
        socket: String,
        topology: &'static str,
        exporter: Option<SocketMetricsExporter>,
    ) -> Self {
        Self {
            socket,
            topology,
            counters: Counters::default(),
            exporter,
        }
    }

    pub(crate) fn record(&self, event: Event) {
        self.counters.slot(event).fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = &self.exporter {
            exporter.observe(&self.socket, self.topology, event);
        }
    }

    pub(crate) fn snapshot(&self) -> SocketStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_local_and_exported_counts() {
        let registry = Registry::new();
        let exporter = SocketMetricsExporter::register(&registry).unwrap();
        let metrics = SocketMetrics::new("node0".into(), "bus", Some(exporter));

        metrics.record(Event::Sent);
        metrics.record(Event::Sent);
        metrics.record(Event::Dropped);
        metrics.record(Event::PeerAdded);

        let stats = metrics.snapshot();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.peers_added, 1);

        let families = registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_owned()).collect();
        assert!(names.contains(&"r_ems_socket_messages_total".to_owned()));
        assert!(names.contains(&"r_ems_socket_peers".to_owned()));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Registry::new();
        SocketMetricsExporter::register(&registry).unwrap();
        assert!(SocketMetricsExporter::register(&registry).is_err());
    }
}
