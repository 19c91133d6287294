//! Value encoding shared by both tiers.
//!
//! Values are stored as JSON so any tier can hand bytes to any caller, and so
//! entries written by one process can be read by another.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

const NULL: &[u8] = b"null";

/// Encode a value. Returns `None` when it serializes to JSON `null`, which
/// the cache never stores.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Option<Bytes>> {
    let buf = serde_json::to_vec(value)?;
    if buf == NULL {
        return Ok(None);
    }
    Ok(Some(Bytes::from(buf)))
}

/// Decode a stored value into the caller's type
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}
