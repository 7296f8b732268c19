//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Correlation state of request/reply and survey sockets.
//!
//! Deadlines are checked when the socket is used rather than by a timer, so
//! an expired entry lingers until the next `send` or `recv` touches it.
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use r_ems_transport::{CorrelationId, Frame};

use crate::error::{Result, SocketError};
use crate::filter::TopicFilter;
use crate::message::Message;
use crate::registry::PeerId;
use crate::Topology;

/// Outstanding request of a `Req` socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingRequest {
    pub(crate) id: CorrelationId,
    /// Unset between reservation and transmission.
    pub(crate) peer: Option<PeerId>,
    pub(crate) deadline: Option<Instant>,
}

/// Open survey of a `Surveyor` socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Survey {
    pub(crate) id: CorrelationId,
    pub(crate) deadline: Instant,
}

/// Unanswered requests a `Rep` or `Respondent` socket may still reply to.
const MAX_UNANSWERED: usize = 1024;

/// Origin peer of each unanswered request, oldest first. Past
/// [`MAX_UNANSWERED`] the oldest entry is forgotten and replying to it
/// fails like any other unknown id. Requests whose peer was retired move to
/// `departed` so a late reply reports the lost connection.
#[derive(Debug, Default)]
pub(crate) struct Origins {
    entries: IndexMap<CorrelationId, PeerId>,
    departed: IndexSet<CorrelationId>,
}

impl Origins {
    fn record(&mut self, id: CorrelationId, peer: PeerId) {
        self.entries.insert(id, peer);
        while self.entries.len() > MAX_UNANSWERED {
            self.entries.shift_remove_index(0);
        }
    }

    fn take(&mut self, id: &CorrelationId) -> Result<PeerId> {
        if let Some(peer) = self.entries.shift_remove(id) {
            return Ok(peer);
        }
        if self.departed.shift_remove(id) {
            return Err(SocketError::ConnectionClosed);
        }
        Err(SocketError::State("reply does not match an outstanding request"))
    }

    fn forget_peer(&mut self, peer: PeerId) {
        let departed = &mut self.departed;
        self.entries.retain(|id, origin| {
            if *origin == peer {
                departed.insert(*id);
            }
            *origin != peer
        });
        while departed.len() > MAX_UNANSWERED {
            departed.shift_remove_index(0);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-topology protocol state.
#[derive(Debug)]
pub(crate) enum Protocol {
    Plain,
    Sub(TopicFilter),
    Req(Option<PendingRequest>),
    Rep(Origins),
    Surveyor(Option<Survey>),
    Respondent(Origins),
}

/// What the receive path should do with an inbound frame.
#[derive(Debug)]
pub(crate) enum Verdict {
    Deliver(Message),
    Discard(&'static str),
}

/// Correlation and routing hints for one outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outbound {
    pub(crate) correlation: Option<CorrelationId>,
    pub(crate) origin: Option<PeerId>,
}

impl Protocol {
    pub(crate) fn for_topology(topology: Topology, topics: &[String]) -> Self {
        match topology {
            Topology::Sub => Protocol::Sub(TopicFilter::new(topics)),
            Topology::Req => Protocol::Req(None),
            Topology::Rep => Protocol::Rep(Origins::default()),
            Topology::Surveyor => Protocol::Surveyor(None),
            Topology::Respondent => Protocol::Respondent(Origins::default()),
            _ => Protocol::Plain,
        }
    }

    pub(crate) fn filter_mut(&mut self) -> Option<&mut TopicFilter> {
        match self {
            Protocol::Sub(filter) => Some(filter),
            _ => None,
        }
    }

    /// Validate that a receive may proceed and return the protocol deadline
    /// bounding it. `registered` reports whether a peer can still deliver.
    pub(crate) fn prepare_receive(
        &mut self,
        now: Instant,
        registered: impl Fn(PeerId) -> bool,
    ) -> Result<Option<Instant>> {
        match self {
            Protocol::Req(slot) => {
                let Some(pending) = slot.as_ref() else {
                    return Err(SocketError::State("no outstanding request"));
                };
                if pending.deadline.is_some_and(|deadline| deadline <= now) {
                    *slot = None;
                    return Err(SocketError::Timeout);
                }
                if pending.peer.is_some_and(|peer| !registered(peer)) {
                    *slot = None;
                    return Err(SocketError::ConnectionClosed);
                }
                Ok(pending.deadline)
            }
            Protocol::Surveyor(survey) => match survey {
                None => Err(SocketError::State("no survey in progress")),
                Some(survey) if survey.deadline <= now => Err(SocketError::Timeout),
                Some(survey) => Ok(Some(survey.deadline)),
            },
            _ => Ok(None),
        }
    }

    /// Reserve correlation state for an outbound message.
    pub(crate) fn prepare_send(
        &mut self,
        message: &Message,
        now: Instant,
        recv_timeout: Option<Duration>,
        survey_time: Duration,
    ) -> Result<Outbound> {
        match self {
            Protocol::Req(slot) => {
                if let Some(pending) = slot.as_ref() {
                    let expired = pending.deadline.is_some_and(|deadline| deadline <= now);
                    if !expired {
                        return Err(SocketError::State("request already outstanding"));
                    }
                }
                let id = CorrelationId::new();
                *slot = Some(PendingRequest {
                    id,
                    peer: None,
                    deadline: recv_timeout.map(|timeout| now + timeout),
                });
                Ok(Outbound {
                    correlation: Some(id),
                    origin: None,
                })
            }
            Protocol::Surveyor(survey) => {
                let id = CorrelationId::new();
                *survey = Some(Survey {
                    id,
                    deadline: now + survey_time,
                });
                Ok(Outbound {
                    correlation: Some(id),
                    origin: None,
                })
            }
            Protocol::Rep(origins) | Protocol::Respondent(origins) => {
                let id = message
                    .correlation()
                    .ok_or(SocketError::State("reply carries no correlation id"))?;
                let origin = origins.take(&id)?;
                Ok(Outbound {
                    correlation: Some(id),
                    origin: Some(origin),
                })
            }
            Protocol::Plain | Protocol::Sub(_) => Ok(Outbound {
                correlation: None,
                origin: None,
            }),
        }
    }

    /// Bind a reserved request to the peer that carried it.
    pub(crate) fn request_sent(&mut self, id: CorrelationId, peer: PeerId) {
        if let Protocol::Req(Some(pending)) = self {
            if pending.id == id {
                pending.peer = Some(peer);
            }
        }
    }

    /// Drop a reservation whose transmission failed.
    pub(crate) fn abort_request(&mut self, id: CorrelationId) {
        if let Protocol::Req(slot) = self {
            if slot.as_ref().is_some_and(|pending| pending.id == id) {
                *slot = None;
            }
        }
    }

    /// Drop state tied to a peer that is gone. A `Req` keeps its pending
    /// entry so the next `recv` can report the lost peer.
    pub(crate) fn forget_peer(&mut self, peer: PeerId) {
        if let Protocol::Rep(origins) | Protocol::Respondent(origins) = self {
            origins.forget_peer(peer);
        }
    }

    /// Classify an inbound frame from `peer`.
    pub(crate) fn inbound(&mut self, peer: PeerId, frame: Frame, now: Instant) -> Verdict {
        match self {
            Protocol::Plain => Verdict::Deliver(Message::from_frame(frame)),
            Protocol::Sub(filter) => {
                if filter.matches(&frame.body) {
                    Verdict::Deliver(Message::from_frame(frame))
                } else {
                    Verdict::Discard("topic filtered")
                }
            }
            Protocol::Req(slot) => {
                let matches = slot
                    .as_ref()
                    .is_some_and(|pending| frame.correlation == Some(pending.id));
                if matches {
                    *slot = None;
                    Verdict::Deliver(Message::from_frame(frame))
                } else {
                    Verdict::Discard("stale reply")
                }
            }
            Protocol::Surveyor(survey) => {
                let current = survey
                    .as_ref()
                    .is_some_and(|s| frame.correlation == Some(s.id) && now < s.deadline);
                if current {
                    Verdict::Deliver(Message::from_frame(frame))
                } else {
                    Verdict::Discard("late or foreign response")
                }
            }
            Protocol::Rep(origins) | Protocol::Respondent(origins) => match frame.correlation {
                Some(id) => {
                    origins.record(id, peer);
                    Verdict::Deliver(Message::from_frame(frame))
                }
                None => Verdict::Discard("uncorrelated request"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests_support::ids;

    const WINDOW: Duration = Duration::from_millis(100);

    fn deliver(verdict: Verdict) -> Message {
        match verdict {
            Verdict::Deliver(message) => message,
            Verdict::Discard(reason) => panic!("discarded: {reason}"),
        }
    }

    #[test]
    fn req_allows_one_outstanding_request() {
        let now = Instant::now();
        let peer = ids(1)[0];
        let mut protocol = Protocol::for_topology(Topology::Req, &[]);
        assert!(matches!(
            protocol.prepare_receive(now, |_| true),
            Err(SocketError::State(_))
        ));

        let out = protocol
            .prepare_send(&Message::new("DATE"), now, Some(WINDOW), WINDOW)
            .unwrap();
        let id = out.correlation.unwrap();
        protocol.request_sent(id, peer);
        assert!(matches!(
            protocol.prepare_send(&Message::new("again"), now, Some(WINDOW), WINDOW),
            Err(SocketError::State(_))
        ));

        let stale = Frame::new("old").with_correlation(CorrelationId::new());
        assert!(matches!(protocol.inbound(peer, stale, now), Verdict::Discard(_)));
        let reply = deliver(protocol.inbound(peer, Frame::new("now").with_correlation(id), now));
        assert_eq!(reply.as_str(), Some("now"));
        assert!(protocol.prepare_receive(now, |_| true).is_err());
    }

    #[test]
    fn req_expiry_clears_entry() {
        let now = Instant::now();
        let mut protocol = Protocol::for_topology(Topology::Req, &[]);
        protocol
            .prepare_send(&Message::new("x"), now, Some(WINDOW), WINDOW)
            .unwrap();
        let later = now + WINDOW;
        assert!(matches!(
            protocol.prepare_receive(later, |_| true),
            Err(SocketError::Timeout)
        ));
        assert!(matches!(
            protocol.prepare_receive(later, |_| true),
            Err(SocketError::State(_))
        ));
        assert!(protocol
            .prepare_send(&Message::new("y"), later, Some(WINDOW), WINDOW)
            .is_ok());
    }

    #[test]
    fn req_lost_peer_reports_connection_closed() {
        let now = Instant::now();
        let peer = ids(1)[0];
        let mut protocol = Protocol::for_topology(Topology::Req, &[]);
        let id = protocol
            .prepare_send(&Message::new("x"), now, None, WINDOW)
            .unwrap()
            .correlation
            .unwrap();
        protocol.request_sent(id, peer);
        assert_eq!(protocol.prepare_receive(now, |_| true).unwrap(), None);
        assert!(matches!(
            protocol.prepare_receive(now, |_| false),
            Err(SocketError::ConnectionClosed)
        ));
    }

    #[test]
    fn surveyor_discards_late_and_foreign_responses() {
        let now = Instant::now();
        let peer = ids(1)[0];
        let mut protocol = Protocol::for_topology(Topology::Surveyor, &[]);
        let first = protocol
            .prepare_send(&Message::new("q1"), now, None, WINDOW)
            .unwrap()
            .correlation
            .unwrap();
        let second = protocol
            .prepare_send(&Message::new("q2"), now, None, WINDOW)
            .unwrap()
            .correlation
            .unwrap();

        let old = Frame::new("a1").with_correlation(first);
        assert!(matches!(protocol.inbound(peer, old, now), Verdict::Discard(_)));
        let fresh = Frame::new("a2").with_correlation(second);
        deliver(protocol.inbound(peer, fresh.clone(), now));
        deliver(protocol.inbound(peer, fresh.clone(), now));

        let after = now + WINDOW;
        assert!(matches!(protocol.inbound(peer, fresh, after), Verdict::Discard(_)));
        assert!(matches!(
            protocol.prepare_receive(after, |_| true),
            Err(SocketError::Timeout)
        ));
    }

    #[test]
    fn rep_routes_reply_to_origin_once() {
        let now = Instant::now();
        let peers = ids(2);
        let mut protocol = Protocol::for_topology(Topology::Rep, &[]);
        assert!(matches!(
            protocol.inbound(peers[0], Frame::new("bare"), now),
            Verdict::Discard(_)
        ));

        let id = CorrelationId::new();
        let request = deliver(protocol.inbound(peers[1], Frame::new("DATE").with_correlation(id), now));
        let out = protocol
            .prepare_send(&request.reply("today"), now, None, WINDOW)
            .unwrap();
        assert_eq!(out.origin, Some(peers[1]));
        assert_eq!(out.correlation, Some(id));
        assert!(matches!(
            protocol.prepare_send(&request.reply("twice"), now, None, WINDOW),
            Err(SocketError::State(_))
        ));
        assert!(matches!(
            protocol.prepare_send(&Message::new("orphan"), now, None, WINDOW),
            Err(SocketError::State(_))
        ));
    }

    fn origins(protocol: &Protocol) -> usize {
        match protocol {
            Protocol::Rep(origins) | Protocol::Respondent(origins) => origins.len(),
            other => panic!("no origin table: {other:?}"),
        }
    }

    #[test]
    fn unanswered_surveys_stay_bounded() {
        let now = Instant::now();
        let peer = ids(1)[0];
        let mut protocol = Protocol::for_topology(Topology::Respondent, &[]);
        let first = CorrelationId::new();
        deliver(protocol.inbound(peer, Frame::new("q").with_correlation(first), now));
        for _ in 0..10_000 {
            let frame = Frame::new("q").with_correlation(CorrelationId::new());
            deliver(protocol.inbound(peer, frame, now));
        }
        assert_eq!(origins(&protocol), MAX_UNANSWERED);

        let evicted = Message::from_frame(Frame::new("late").with_correlation(first));
        assert!(matches!(
            protocol.prepare_send(&evicted, now, None, WINDOW),
            Err(SocketError::State(_))
        ));

        let last = CorrelationId::new();
        let question = deliver(protocol.inbound(peer, Frame::new("q").with_correlation(last), now));
        let out = protocol
            .prepare_send(&question.reply("a"), now, None, WINDOW)
            .unwrap();
        assert_eq!(out.origin, Some(peer));
    }

    #[test]
    fn retired_peer_requests_are_forgotten() {
        let now = Instant::now();
        let peers = ids(2);
        let mut protocol = Protocol::for_topology(Topology::Rep, &[]);
        for (index, peer) in peers.iter().enumerate() {
            for _ in 0..=index {
                let frame = Frame::new("DATE").with_correlation(CorrelationId::new());
                deliver(protocol.inbound(*peer, frame, now));
            }
        }
        assert_eq!(origins(&protocol), 3);

        protocol.forget_peer(peers[1]);
        assert_eq!(origins(&protocol), 1);
        protocol.forget_peer(peers[0]);
        assert_eq!(origins(&protocol), 0);
    }

    #[test]
    fn reply_to_departed_peer_reports_closed_connection() {
        let now = Instant::now();
        let peer = ids(1)[0];
        let mut protocol = Protocol::for_topology(Topology::Rep, &[]);
        let id = CorrelationId::new();
        let request = deliver(protocol.inbound(peer, Frame::new("DATE").with_correlation(id), now));
        protocol.forget_peer(peer);
        assert_eq!(origins(&protocol), 0);

        assert!(matches!(
            protocol.prepare_send(&request.reply("today"), now, None, WINDOW),
            Err(SocketError::ConnectionClosed)
        ));
        assert!(matches!(
            protocol.prepare_send(&request.reply("again"), now, None, WINDOW),
            Err(SocketError::State(_))
        ));
    }

    #[test]
    fn sub_filters_by_prefix() {
        let now = Instant::now();
        let peer = ids(1)[0];
        let mut protocol = Protocol::for_topology(Topology::Sub, &["A".to_owned()]);
        deliver(protocol.inbound(peer, Frame::new("AB"), now));
        assert!(matches!(protocol.inbound(peer, Frame::new("BA"), now), Verdict::Discard(_)));
        protocol.filter_mut().unwrap().unsubscribe(b"A");
        deliver(protocol.inbound(peer, Frame::new("BA"), now));
    }
}
