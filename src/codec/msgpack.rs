//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named`, i.e. as maps keyed by field name,
//! so a MsgPack peer sees the same field names a JSON peer would.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::PayloadCodec;
use crate::error::Result;

/// MessagePack codec for structured data.
///
/// A drop-in alternative to [`JsonCodec`](super::JsonCodec) when both peers
/// agree on it; the framing does not change.
pub struct MsgPackCodec;

impl PayloadCodec for MsgPackCodec {
    #[inline]
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
