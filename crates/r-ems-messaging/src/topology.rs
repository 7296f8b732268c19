//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Connection and fan-out shape governing how a socket sends and receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Exactly one peer; bidirectional.
    Pair,
    /// Many peers; broadcast to all, never to self.
    Bus,
    /// Pipeline producer; each message to one peer, round-robin.
    Push,
    /// Pipeline consumer; fan-in from all peers.
    Pull,
    /// Publisher; broadcast to every subscriber.
    Pub,
    /// Subscriber; receive-only with a topic filter.
    Sub,
    /// Requester; one outstanding request at a time.
    Req,
    /// Replier; answers each request on its originating connection.
    Rep,
    /// Surveyor; broadcasts a survey and collects responses until a deadline.
    Surveyor,
    /// Respondent; answers surveys on their originating connection.
    Respondent,
}

impl Topology {
    /// Every topology, in declaration order.
    pub const ALL: [Topology; 10] = [
        Topology::Pair,
        Topology::Bus,
        Topology::Push,
        Topology::Pull,
        Topology::Pub,
        Topology::Sub,
        Topology::Req,
        Topology::Rep,
        Topology::Surveyor,
        Topology::Respondent,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Pair => "pair",
            Topology::Bus => "bus",
            Topology::Push => "push",
            Topology::Pull => "pull",
            Topology::Pub => "pub",
            Topology::Sub => "sub",
            Topology::Req => "req",
            Topology::Rep => "rep",
            Topology::Surveyor => "surveyor",
            Topology::Respondent => "respondent",
        }
    }

    /// Whether `send` is part of this topology's contract.
    pub fn can_send(&self) -> bool {
        !matches!(self, Topology::Pull | Topology::Sub)
    }

    /// Whether `receive` is part of this topology's contract.
    pub fn can_receive(&self) -> bool {
        !matches!(self, Topology::Push | Topology::Pub)
    }

    /// Upper bound on simultaneously live peers, if any.
    pub fn max_peers(&self) -> Option<usize> {
        match self {
            Topology::Pair => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Topology::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| format!("unknown topology: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for topology in Topology::ALL {
            assert_eq!(topology.as_str().parse::<Topology>(), Ok(topology));
        }
        assert!("dealer".parse::<Topology>().is_err());
    }

    #[test]
    fn one_way_variants_reject_the_other_direction() {
        assert!(!Topology::Pull.can_send());
        assert!(!Topology::Sub.can_send());
        assert!(!Topology::Push.can_receive());
        assert!(!Topology::Pub.can_receive());
        assert!(Topology::Bus.can_send() && Topology::Bus.can_receive());
        assert_eq!(Topology::Pair.max_peers(), Some(1));
        assert_eq!(Topology::Bus.max_peers(), None);
    }
}
