//! Codec module - serialization/deserialization for payloads.
//!
//! The framing layer treats payloads as opaque bytes. Codecs turn typed
//! messages into those bytes and back:
//!
//! - [`JsonCodec`] - JSON via `serde_json` (the default, wire-compatible with
//!   the reference peers)
//! - [`MsgPackCodec`] - MessagePack via `rmp-serde`
//!
//! # Design
//!
//! Codecs are marker structs implementing [`PayloadCodec`] with associated
//! functions rather than trait objects. The codec is picked at compile time
//! where a message is sent or a handler is registered.
//!
//! # Example
//!
//! ```
//! use tagwire::codec::{JsonCodec, MsgPackCodec, PayloadCodec};
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! assert_eq!(encoded, br#""hello""#);
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let encoded = MsgPackCodec::encode(&42u32).unwrap();
//! let decoded: u32 = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, 42);
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A payload encoding that round-trips values to bytes.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Encode a value to payload bytes.
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>>;

    /// Decode payload bytes into a value.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}
