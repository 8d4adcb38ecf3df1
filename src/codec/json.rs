//! JSON codec using `serde_json`.
//!
//! Field names are taken from the serde attributes of the message type, so
//! structs meant to interoperate with other peers should pin them with
//! `#[serde(rename = ...)]` or `rename_all`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::PayloadCodec;
use crate::error::Result;

/// JSON codec for structured data.
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    #[inline]
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
