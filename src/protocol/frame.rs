//! Frame struct and message encoding.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use tagwire::codec::JsonCodec;
//! use tagwire::protocol::{encode_message, Message, Tag, HEADER_SIZE};
//!
//! #[derive(serde::Serialize)]
//! struct Echo {
//!     #[serde(rename = "Value")]
//!     value: i64,
//! }
//!
//! impl Message for Echo {
//!     fn tag(&self) -> Tag {
//!         0
//!     }
//! }
//!
//! let bytes = encode_message::<JsonCodec, _>(&Echo { value: 42 }).unwrap();
//! assert_eq!(&bytes[..HEADER_SIZE], &[0, 0, 0, 0, 0, 0, 0, 12]);
//! assert_eq!(&bytes[HEADER_SIZE..], br#"{"Value":42}"#);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::wire_format::{Header, Tag, HEADER_SIZE};
use crate::codec::PayloadCodec;
use crate::error::{Result, TagwireError};

/// An application message that knows its own tag.
///
/// The payload is produced by whichever [`PayloadCodec`] the sender picks.
pub trait Message: Serialize {
    /// Tag written into the frame header.
    fn tag(&self) -> Tag;
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a frame for `tag`, deriving the length from the payload.
    pub fn from_payload(tag: Tag, payload: Bytes) -> Result<Self> {
        let length = payload_length(payload.len())?;
        Ok(Self::new(Header::new(tag, length), payload))
    }

    /// Get the tag.
    #[inline]
    pub fn tag(&self) -> Tag {
        self.header.tag
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Encode the whole frame into one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        build_frame(&self.header, &self.payload)
    }
}

/// Convert a payload size into the header's length field.
pub(crate) fn payload_length(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        TagwireError::Framing(format!("Payload size {} does not fit in a u32 length", len))
    })
}

/// Build a complete frame as a single buffer.
///
/// Encodes header and appends payload into a contiguous buffer.
pub fn build_frame(header: &Header, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a message into a complete frame with codec `C`.
///
/// The payload is serialized before anything is produced, so a codec failure
/// never yields a partial frame.
pub fn encode_message<C, M>(message: &M) -> Result<Bytes>
where
    C: PayloadCodec,
    M: Message + ?Sized,
{
    let payload = C::encode(message)?;
    let header = Header::new(message.tag(), payload_length(payload.len())?);
    Ok(build_frame(&header, &payload))
}
