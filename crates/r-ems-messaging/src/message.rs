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

use bytes::Bytes;
use r_ems_transport::{CorrelationId, Frame};

/// Immutable payload handed to and returned from sockets.
///
/// Request/reply and survey sockets expose the correlation identifier of
/// inbound requests so the application can shape a reply with
/// [`Message::reply`].
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    body: Bytes,
    correlation: Option<CorrelationId>,
}

impl Message {
    /// Uncorrelated message.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            correlation: None,
        }
    }

    /// Message carrying an explicit correlation identifier.
    pub fn with_correlation(body: impl Into<Bytes>, correlation: CorrelationId) -> Self {
        Self {
            body: body.into(),
            correlation: Some(correlation),
        }
    }

    /// Build the reply to this request or survey.
    pub fn reply(&self, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            correlation: self.correlation,
        }
    }

    /// Payload bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the message and return its payload.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Payload as UTF-8, when valid.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Correlation identifier, if present.
    pub fn correlation(&self) -> Option<CorrelationId> {
        self.correlation
    }

    pub(crate) fn from_frame(frame: Frame) -> Self {
        Self {
            body: frame.body,
            correlation: frame.correlation,
        }
    }

    pub(crate) fn to_frame(&self, correlation: Option<CorrelationId>) -> Frame {
        Frame {
            correlation,
            body: self.body.clone(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.body.len())
            .field("correlation", &self.correlation)
            .finish()
    }
}

impl From<&'static str> for Message {
    fn from(body: &'static str) -> Self {
        Self::new(body)
    }
}

impl From<String> for Message {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Self::new(body)
    }
}

impl From<Bytes> for Message {
    fn from(body: Bytes) -> Self {
        Self::new(body)
    }
}
