//! Error taxonomy for the broker.
//!
//! Each layer gets its own enum so callers can match on the specific failure
//! without downcasting, and `thiserror` derives the boilerplate `Display`/
//! `Error`/`From` impls that would otherwise be repeated by hand.

use crate::codec::Format;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unrecognized format tag: {0}")]
    UnknownFormat(u8),

    #[error("malformed {0:?} payload: {1}")]
    Malformed(Format, String),

    #[error("encoded payload is {0} bytes, exceeding the 65535-byte frame limit")]
    PayloadTooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is missing the 'method' field")]
    MissingMethod,

    #[error("frame is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unrecognized method: {0}")]
    UnknownMethod(String),

    #[error("connection closed mid-frame")]
    TruncatedFrame,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
