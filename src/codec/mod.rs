//! The wire codec.
//!
//! Stateless given a [`Format`]: encodes a [`Record`](crate::message::Record) to
//! a length-prefixed byte payload and decodes the reverse. Framing (the length
//! prefix, and the client-to-broker format tag) lives here too, independent of
//! which format is in play.

mod json;
mod object;
mod xml;

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::CodecError;
use crate::message::Record;

const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Wire format tag: `0=JSON, 1=XML, 2=binary-object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Xml,
    Object,
}

impl Format {
    pub fn from_tag(tag: u8) -> Result<Format, CodecError> {
        match tag {
            0 => Ok(Format::Json),
            1 => Ok(Format::Xml),
            2 => Ok(Format::Object),
            other => Err(CodecError::UnknownFormat(other)),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Format::Json => 0,
            Format::Xml => 1,
            Format::Object => 2,
        }
    }
}

/// Encode a record to its format-specific byte representation, unframed.
pub fn encode_payload(format: Format, record: &Record) -> Result<Vec<u8>, CodecError> {
    match format {
        Format::Json => json::encode(record),
        Format::Xml => xml::encode(record),
        Format::Object => object::encode(record),
    }
}

/// Decode a format-specific byte payload back to a record.
pub fn decode_payload(format: Format, payload: &[u8]) -> Result<Record, CodecError> {
    match format {
        Format::Json => json::decode(payload),
        Format::Xml => xml::decode(payload),
        Format::Object => object::decode(payload),
    }
}

fn frame(payload: Vec<u8>) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }

    let mut framed = Vec::with_capacity(2 + payload.len());
    framed
        .write_u16::<BigEndian>(payload.len() as u16)
        .expect("writes to a Vec never fail");
    framed.extend_from_slice(&payload);
    Ok(framed)
}

/// Broker-to-client frame: `length(2, BE) || payload`. No format tag — the
/// client's format was already recorded from its first frame.
pub fn frame_broker_to_client(format: Format, record: &Record) -> Result<Vec<u8>, CodecError> {
    frame(encode_payload(format, record)?)
}

/// Client-to-broker frame: `format(1) || length(2, BE) || payload`.
pub fn frame_client_to_broker(format: Format, record: &Record) -> Result<Vec<u8>, CodecError> {
    let mut framed = Vec::new();
    framed.push(format.tag());
    framed.extend_from_slice(&frame(encode_payload(format, record)?)?);
    Ok(framed)
}
