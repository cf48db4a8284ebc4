use serde_json::Value;

use crate::error::CodecError;
use crate::message::Record;

use super::Format;

pub fn encode(record: &Record) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(record).map_err(|e| CodecError::Malformed(Format::Json, e.to_string()))
}

pub fn decode(payload: &[u8]) -> Result<Record, CodecError> {
    match serde_json::from_slice(payload) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(_) => Err(CodecError::Malformed(
            Format::Json,
            "top-level JSON value is not an object".to_owned(),
        )),
        Err(e) => Err(CodecError::Malformed(Format::Json, e.to_string())),
    }
}
