//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use bytes::Bytes;

/// Subscriber-side prefix filter. An empty filter matches every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilter {
    topics: Vec<Bytes>,
}

impl TopicFilter {
    /// Filter from an initial topic list; duplicates are collapsed.
    pub fn new<I, T>(topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut filter = Self::default();
        for topic in topics {
            filter.subscribe(topic.as_ref());
        }
        filter
    }

    /// Add a prefix. Returns `false` when it was already present.
    pub fn subscribe(&mut self, topic: &[u8]) -> bool {
        if self.topics.iter().any(|t| t.as_ref() == topic) {
            return false;
        }
        self.topics.push(Bytes::copy_from_slice(topic));
        true
    }

    /// Remove a prefix. Returns `false` when it was not present.
    pub fn unsubscribe(&mut self, topic: &[u8]) -> bool {
        let before = self.topics.len();
        self.topics.retain(|t| t.as_ref() != topic);
        before != self.topics.len()
    }

    /// Whether `payload` passes the filter.
    pub fn matches(&self, payload: &[u8]) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| payload.starts_with(t))
    }

    /// Number of registered prefixes.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// True when no prefix is registered (match-all).
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
