//! Protocol module - wire format, framing, and frame reads.
//!
//! This module implements the binary protocol:
//! - 8-byte header encoding/decoding
//! - Frame struct and message-to-frame encoding
//! - Exact-length frame reads that tolerate short socket reads

mod frame;
mod reader;
mod wire_format;

pub use frame::{build_frame, encode_message, Frame, Message};
pub(crate) use frame::payload_length;
pub use reader::{read_frame, read_full};
pub use wire_format::{
    decode_header, Header, Tag, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, LENGTH_SIZE, TAG_SIZE,
};
