//! Fixed-width binary encoding shared by packets and network values
//!
//! Integers and floats are little-endian fixed width, strings and sequences
//! carry a u64 length prefix.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::NetError;

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    Ok(options().serialize(value)?)
}

/// Appends the encoding of `value` to `out`
pub fn encode_into<T: Serialize>(out: &mut Vec<u8>, value: &T) -> Result<(), NetError> {
    options().serialize_into(out, value)?;
    Ok(())
}

/// Decodes a whole buffer; leftover bytes are a length mismatch
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, NetError> {
    options()
        .deserialize(bytes)
        .map_err(|e| NetError::malformed(e.to_string()))
}

/// Decodes one value from the front of `input` and advances it
pub fn decode_from<T: DeserializeOwned>(input: &mut &[u8]) -> Result<T, NetError> {
    options()
        .allow_trailing_bytes()
        .deserialize_from(input)
        .map_err(|e| NetError::malformed(e.to_string()))
}
