//! Binary object format: an opaque serialization both ends must agree on.
//! `bincode` over the same `Record` value model used by the JSON codec — the
//! only format here that faithfully round-trips arbitrary nesting.

use crate::error::CodecError;
use crate::message::Record;

use super::Format;

pub fn encode(record: &Record) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(record).map_err(|e| CodecError::Malformed(Format::Object, e.to_string()))
}

pub fn decode(payload: &[u8]) -> Result<Record, CodecError> {
    bincode::deserialize(payload).map_err(|e| CodecError::Malformed(Format::Object, e.to_string()))
}
