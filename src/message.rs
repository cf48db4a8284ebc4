//! The protocol-level message model.
//!
//! A `Record` is the generic key/value map the codec layer speaks (JSON object,
//! XML attribute set, or the equivalent binary-object shape). `Frame` is the
//! protocol handler's typed view over the six methods the wire contract defines;
//! the codec boundary is the only place the erasure between the two happens.

use serde_json::Value;

use crate::error::ProtocolError;

pub type Record = serde_json::Map<String, Value>;

/// A typed protocol frame. `Subscribe`/`Publish`/`Unsubscribe`/`ListRequest` are
/// accepted from clients; `Send`/`ListReply` are emitted by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Subscribe { topic: String },
    Publish { topic: String, msg: Value },
    Unsubscribe { topic: String },
    ListRequest,
    Send { data: Value },
    ListReply { topics: Vec<String> },
}

impl Frame {
    pub fn from_record(mut record: Record) -> Result<Frame, ProtocolError> {
        let method = record
            .remove("method")
            .and_then(|v| v.as_str().map(str::to_owned))
            .ok_or(ProtocolError::MissingMethod)?;

        match method.as_str() {
            "SUBSCRIBE" => Ok(Frame::Subscribe {
                topic: take_string(&mut record, "topic")?,
            }),
            "PUBLICATE" => {
                let args = record
                    .remove("args")
                    .and_then(|v| match v {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .ok_or(ProtocolError::MissingField("args"))?;
                let mut args = args;
                let topic = take_string(&mut args, "topic")?;
                let msg = args
                    .remove("msg")
                    .ok_or(ProtocolError::MissingField("args.msg"))?;
                Ok(Frame::Publish { topic, msg })
            }
            "UNSUBSCRIBE" => Ok(Frame::Unsubscribe {
                topic: take_string(&mut record, "topic")?,
            }),
            "REQ_TOPICS" => Ok(Frame::ListRequest),
            other => Err(ProtocolError::UnknownMethod(other.to_owned())),
        }
    }

    pub fn into_record(self) -> Record {
        let mut record = Record::new();
        match self {
            Frame::Subscribe { topic } => {
                record.insert("method".into(), Value::String("SUBSCRIBE".into()));
                record.insert("topic".into(), Value::String(topic));
            }
            Frame::Publish { topic, msg } => {
                record.insert("method".into(), Value::String("PUBLICATE".into()));
                let mut args = Record::new();
                args.insert("topic".into(), Value::String(topic));
                args.insert("msg".into(), msg);
                record.insert("args".into(), Value::Object(args));
            }
            Frame::Unsubscribe { topic } => {
                record.insert("method".into(), Value::String("UNSUBSCRIBE".into()));
                record.insert("topic".into(), Value::String(topic));
            }
            Frame::ListRequest => {
                record.insert("method".into(), Value::String("REQ_TOPICS".into()));
            }
            Frame::Send { data } => {
                record.insert("method".into(), Value::String("SEND".into()));
                record.insert("data".into(), data);
            }
            Frame::ListReply { topics } => {
                record.insert("method".into(), Value::String("REP_TOPICS".into()));
                record.insert(
                    "lst".into(),
                    Value::Array(topics.into_iter().map(Value::String).collect()),
                );
            }
        }
        record
    }
}

fn take_string(record: &mut Record, field: &'static str) -> Result<String, ProtocolError> {
    record
        .remove(field)
        .and_then(|v| v.as_str().map(str::to_owned))
        .ok_or(ProtocolError::MissingField(field))
}
