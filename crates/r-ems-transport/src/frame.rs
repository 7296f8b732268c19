//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport implementations for messaging layers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::{Result, TransportError};

/// Largest body accepted by stream transports.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const FLAG_CORRELATED: u8 = 0x01;

/// Opaque token binding a reply to the request or survey that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Rebuild an identifier from its wire representation.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Wire representation.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unit exchanged over a connection: a byte body plus the out-of-band
/// correlation identifier used by request/reply and survey sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation identifier, if the sending protocol attaches one.
    pub correlation: Option<CorrelationId>,
    /// Opaque payload.
    pub body: Bytes,
}

impl Frame {
    /// Frame without a correlation identifier.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            correlation: None,
            body: body.into(),
        }
    }

    /// Attach a correlation identifier.
    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation = Some(id);
        self
    }

    /// Append the stream encoding of this frame to `dst`.
    ///
    /// Layout: flags (`u8`), optional 16-byte correlation id, body length
    /// (`u32`, big endian), body.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        if self.body.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge {
                size: self.body.len(),
                limit: MAX_FRAME_LEN,
            });
        }
        dst.reserve(1 + 16 + 4 + self.body.len());
        match &self.correlation {
            Some(id) => {
                dst.put_u8(FLAG_CORRELATED);
                dst.put_slice(id.as_bytes());
            }
            None => dst.put_u8(0),
        }
        dst.put_u32(self.body.len() as u32);
        dst.put_slice(&self.body);
        Ok(())
    }

    /// Split one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` while the buffer holds only part of a frame; the
    /// partial bytes stay in `src` for the next call.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(&flags) = src.first() else {
            return Ok(None);
        };
        let header = if flags & FLAG_CORRELATED != 0 { 1 + 16 } else { 1 };
        if src.len() < header + 4 {
            return Ok(None);
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&src[header..header + 4]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge {
                size: len,
                limit: MAX_FRAME_LEN,
            });
        }
        let total = header + 4 + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let head = src.split_to(header + 4);
        let correlation = (header > 1).then(|| {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&head[1..17]);
            CorrelationId::from_bytes(raw)
        });
        Ok(Some(Frame {
            correlation,
            body: src.split_to(len).freeze(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout_without_correlation() {
        let mut buf = BytesMut::new();
        Frame::new("DATE").encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 0, 4, b'D', b'A', b'T', b'E']);
    }

    #[test]
    fn correlated_frame_survives_stream_decoding() {
        let id = CorrelationId::new();
        let frame = Frame::new("reply").with_correlation(id);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        Frame::new("next").encode(&mut buf).unwrap();
        assert_eq!(buf.len(), (1 + 16 + 4 + 5) + (1 + 4 + 4));

        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(frame));
        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(Frame::new("next")));
        assert!(buf.is_empty());
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut raw = BytesMut::new();
        raw.extend_from_slice(&[0]);
        raw.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        let err = Frame::decode(&mut raw).unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[test]
    fn partial_frame_waits_for_remaining_bytes() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 0, 9, b'x']);
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 6);

        buf.extend_from_slice(b"12345678");
        let frame = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.body[..], b"x12345678");
    }
}
