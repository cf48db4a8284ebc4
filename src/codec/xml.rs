//! XML codec: the record is encoded as a single `<main>` element whose
//! attributes are the record's top-level entries, both key and value coerced
//! to string. Nested structures must already be flattened by the producer —
//! this codec does not attempt to reconstruct them.

use std::io::Cursor;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;

use crate::error::CodecError;
use crate::message::Record;

use super::Format;

pub fn encode(record: &Record) -> Result<Vec<u8>, CodecError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut start = BytesStart::new("main");
    for (key, value) in record {
        start.push_attribute((key.as_str(), value_to_attr(value).as_str()));
    }
    writer
        .write_event(Event::Empty(start))
        .map_err(|e| CodecError::Malformed(Format::Xml, e.to_string()))?;
    Ok(writer.into_inner().into_inner())
}

fn value_to_attr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts only an element tagged `main`; any other tag decodes to an absent
/// record (represented here as an empty map, which lacks the required
/// `method` field and so fails at the protocol layer rather than this one).
pub fn decode(payload: &[u8]) -> Result<Record, CodecError> {
    let mut reader = Reader::from_reader(Cursor::new(payload));
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => {
                return Err(CodecError::Malformed(Format::Xml, "unexpected end of document".into()))
            }
            Ok(Event::Start(tag)) | Ok(Event::Empty(tag)) => {
                if tag.name().as_ref() != b"main" {
                    return Ok(Record::new());
                }
                return attributes_to_record(&tag);
            }
            Ok(_) => continue,
            Err(e) => return Err(CodecError::Malformed(Format::Xml, e.to_string())),
        }
    }
}

fn attributes_to_record(tag: &BytesStart) -> Result<Record, CodecError> {
    let mut record = Record::new();
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| CodecError::Malformed(Format::Xml, e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| CodecError::Malformed(Format::Xml, e.to_string()))?
            .into_owned();
        record.insert(key, Value::String(value));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_modulo_string_coercion() {
        let mut record = Record::new();
        record.insert("topic".into(), Value::String("/weather".into()));
        record.insert("data".into(), Value::String("sunny".into()));

        let bytes = encode(&record).unwrap();
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn non_string_values_are_coerced_to_their_string_form() {
        let mut record = Record::new();
        record.insert("data".into(), Value::Number(42.into()));

        let bytes = encode(&record).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.get("data"), Some(&Value::String("42".into())));
    }

    #[test]
    fn a_non_main_tag_decodes_to_an_absent_record() {
        let bytes = b"<other a=\"1\"/>".to_vec();
        assert_eq!(decode(&bytes).unwrap(), Record::new());
    }
}
