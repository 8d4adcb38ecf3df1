//! Wire format encoding and decoding.
//!
//! Implements the 8-byte header format:
//! ```text
//! ┌──────────┬──────────┬─────────────────┐
//! │ Tag      │ Length   │ Payload         │
//! │ 4 bytes  │ 4 bytes  │ Length bytes    │
//! │ uint32 BE│ uint32 BE│ opaque          │
//! └──────────┴──────────┴─────────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. There is no magic number, version
//! byte or checksum.

use crate::error::{Result, TagwireError};

/// Message kind identifier carried in every frame.
pub type Tag = u32;

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Size of the tag field.
pub const TAG_SIZE: usize = 4;

/// Size of the length field.
pub const LENGTH_SIZE: usize = 4;

/// Default maximum payload size accepted by a reader (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message tag.
    pub tag: Tag,
    /// Payload length in bytes.
    pub length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(tag: Tag, length: u32) -> Self {
        Self { tag, length }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use tagwire::protocol::Header;
    ///
    /// let bytes = Header::new(3, 256).encode();
    /// assert_eq!(bytes, [0, 0, 0, 3, 0, 0, 1, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[..TAG_SIZE].copy_from_slice(&self.tag.to_be_bytes());
        buf[TAG_SIZE..HEADER_SIZE].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Decode header from exactly 8 bytes (Big Endian).
    ///
    /// Never fails: every 8-byte pattern is a valid tag and length.
    ///
    /// # Example
    ///
    /// ```
    /// use tagwire::protocol::Header;
    ///
    /// let header = Header::decode(&[0, 0, 0, 0, 0, 0, 0, 12]);
    /// assert_eq!(header.tag, 0);
    /// assert_eq!(header.length, 12);
    /// ```
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            tag: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    /// Reject headers announcing a payload larger than `max_payload_size`.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.length > max_payload_size {
            return Err(TagwireError::Framing(format!(
                "Payload size {} exceeds maximum {}",
                self.length, max_payload_size
            )));
        }
        Ok(())
    }
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8; HEADER_SIZE]) -> Header {
    Header::decode(buf)
}
