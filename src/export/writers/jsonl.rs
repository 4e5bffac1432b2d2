//! JSON Lines encoding
//!
//! [`JsonWriter`] consumes the same event stream as the tabular writer and
//! produces one Extended JSON object per document, without a trailing newline.
//! Separators follow the `{"a": 1, "b": [1, 2]}` spacing convention.

use std::io;

use clap::ValueEnum;
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;

use super::DocumentEncoder;
use crate::error::EncodeError;
use crate::export::traversal::{EventWriter, WriteEvent, encode_with};

/// Extended JSON flavour used for scalars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonFormat {
    /// Native JSON numbers and ISO dates where lossless.
    #[default]
    Relaxed,
    /// Type-preserving wrappers such as `{"$numberInt": "1"}`.
    Canonical,
}

impl JsonFormat {
    fn to_json(self, value: &Bson) -> serde_json::Value {
        match self {
            JsonFormat::Relaxed => value.clone().into_relaxed_extjson(),
            JsonFormat::Canonical => value.clone().into_canonical_extjson(),
        }
    }
}

/// `serde_json` formatter writing `", "` between items and `": "` after keys.
#[derive(Debug, Default, Clone, Copy)]
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Document,
    Array,
}

#[derive(Debug)]
struct Level {
    container: Container,
    first: bool,
    /// A field name was written and its value is pending.
    named: bool,
}

/// Push-based writer producing one JSON object.
pub struct JsonWriter {
    format: JsonFormat,
    buf: Vec<u8>,
    stack: Vec<Level>,
    done: bool,
}

impl JsonWriter {
    pub fn new(format: JsonFormat) -> Self {
        Self {
            format,
            buf: Vec::with_capacity(256),
            stack: Vec::with_capacity(8),
            done: false,
        }
    }

    /// Write whatever must precede a value in the current container.
    fn begin_value(&mut self) -> Result<(), EncodeError> {
        match self.stack.last_mut() {
            None if self.done => Err(EncodeError::Protocol("document already closed".to_string())),
            None => Ok(()),
            Some(level) => match level.container {
                Container::Document if !level.named => Err(EncodeError::Protocol(
                    "value written before its field name".to_string(),
                )),
                Container::Document => {
                    level.named = false;
                    Ok(())
                }
                Container::Array => {
                    if !level.first {
                        self.buf.extend_from_slice(b", ");
                    }
                    level.first = false;
                    Ok(())
                }
            },
        }
    }

    fn open(&mut self, container: Container) -> Result<(), EncodeError> {
        if self.stack.is_empty() && container == Container::Array {
            return Err(EncodeError::Protocol("top level must be a document".to_string()));
        }
        self.begin_value()?;
        self.buf.push(match container {
            Container::Document => b'{',
            Container::Array => b'[',
        });
        self.stack.push(Level {
            container,
            first: true,
            named: false,
        });
        Ok(())
    }

    fn close(&mut self, container: Container) -> Result<(), EncodeError> {
        match self.stack.pop() {
            Some(level) if level.container == container && !level.named => {}
            _ => {
                return Err(EncodeError::Protocol(format!(
                    "unbalanced end of {container:?}"
                )));
            }
        }
        self.buf.push(match container {
            Container::Document => b'}',
            Container::Array => b']',
        });
        if self.stack.is_empty() {
            self.done = true;
        }
        Ok(())
    }

    fn write_name(&mut self, name: &str) -> Result<(), EncodeError> {
        let level = match self.stack.last_mut() {
            Some(level) if level.container == Container::Document && !level.named => level,
            _ => {
                return Err(EncodeError::Protocol(format!(
                    "unexpected field name '{name}'"
                )));
            }
        };
        if !level.first {
            self.buf.extend_from_slice(b", ");
        }
        level.first = false;
        level.named = true;
        serde_json::to_writer(&mut self.buf, name)?;
        self.buf.extend_from_slice(b": ");
        Ok(())
    }

    fn write_scalar(&mut self, value: &Bson) -> Result<(), EncodeError> {
        if self.stack.is_empty() {
            return Err(EncodeError::Protocol("scalar outside of a document".to_string()));
        }
        self.begin_value()?;
        let json = self.format.to_json(value);
        let mut ser = serde_json::Serializer::with_formatter(&mut self.buf, SpacedFormatter);
        json.serialize(&mut ser)?;
        Ok(())
    }
}

impl EventWriter for JsonWriter {
    type Output = Vec<u8>;

    fn write_event(&mut self, event: WriteEvent<'_>) -> Result<(), EncodeError> {
        match event {
            WriteEvent::StartDocument => self.open(Container::Document),
            WriteEvent::EndDocument => self.close(Container::Document),
            WriteEvent::StartArray => self.open(Container::Array),
            WriteEvent::EndArray => self.close(Container::Array),
            WriteEvent::FieldName(name) => self.write_name(name),
            WriteEvent::Scalar(value) => self.write_scalar(value),
        }
    }

    fn finish(self) -> Result<Vec<u8>, EncodeError> {
        if self.done {
            Ok(self.buf)
        } else {
            Err(EncodeError::Protocol("document was not closed".to_string()))
        }
    }
}

/// JSON Lines [`DocumentEncoder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder {
    format: JsonFormat,
}

impl JsonEncoder {
    pub fn new(format: JsonFormat) -> Self {
        Self { format }
    }
}

impl DocumentEncoder for JsonEncoder {
    fn encode(&self, doc: &Document) -> Result<Vec<u8>, EncodeError> {
        encode_with(doc, JsonWriter::new(self.format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{Binary, DateTime, doc, oid::ObjectId, spec::BinarySubtype};

    fn encode(doc: &Document, format: JsonFormat) -> String {
        String::from_utf8(JsonEncoder::new(format).encode(doc).unwrap()).unwrap()
    }

    #[test]
    fn test_relaxed_nested_line() {
        let doc = doc! {
            "firstName": "Bob",
            "taxlots": [ { "rec": 0 }, { "rec": 1 }, { "rec": 2 } ],
        };
        assert_eq!(
            encode(&doc, JsonFormat::Relaxed),
            r#"{"firstName": "Bob", "taxlots": [{"rec": 0}, {"rec": 1}, {"rec": 2}]}"#
        );
    }

    #[test]
    fn test_canonical_numbers() {
        let doc = doc! { "i": 1, "l": 2i64, "d": 1.5 };
        assert_eq!(
            encode(&doc, JsonFormat::Canonical),
            r#"{"i": {"$numberInt": "1"}, "l": {"$numberLong": "2"}, "d": {"$numberDouble": "1.5"}}"#
        );
    }

    #[test]
    fn test_relaxed_special_types() {
        let oid = ObjectId::parse_str("65b78d05d12faf22a9edaeaf").unwrap();
        let doc = doc! {
            "_id": oid,
            "when": DateTime::from_millis(1_704_110_400_000),
            "blob": Binary { subtype: BinarySubtype::Generic, bytes: vec![1, 2] },
            "none": null,
        };
        let line = encode(&doc, JsonFormat::Relaxed);
        assert!(line.starts_with(r#"{"_id": {"$oid": "65b78d05d12faf22a9edaeaf"}, "when": {"$date": "2024-01-01T12:00:00"#));
        assert!(line.contains(r#""blob": {"$binary": {"#));
        assert!(line.ends_with(r#""none": null}"#));
    }

    #[test]
    fn test_escapes_keys_and_strings() {
        let doc = doc! { "we\"ird": "line\nbreak" };
        assert_eq!(
            encode(&doc, JsonFormat::Relaxed),
            r#"{"we\"ird": "line\nbreak"}"#
        );
    }

    #[test]
    fn test_empty_containers() {
        let doc = doc! { "a": {}, "b": [] };
        assert_eq!(encode(&doc, JsonFormat::Relaxed), r#"{"a": {}, "b": []}"#);
    }

    #[test]
    fn test_output_is_valid_json() {
        let doc = doc! { "a": [1, [2, { "b": [true, null] }]], "c": { "d": "e" } };
        let line = encode(&doc, JsonFormat::Relaxed);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["a"][1][1]["b"][0], serde_json::Value::Bool(true));
    }

    #[test]
    fn test_protocol_errors() {
        let mut writer = JsonWriter::new(JsonFormat::Relaxed);
        assert!(writer.write_event(WriteEvent::StartArray).is_err());

        let mut writer = JsonWriter::new(JsonFormat::Relaxed);
        writer.write_event(WriteEvent::StartDocument).unwrap();
        assert!(writer.write_event(WriteEvent::Scalar(&Bson::Int32(1))).is_err());

        let mut writer = JsonWriter::new(JsonFormat::Relaxed);
        writer.write_event(WriteEvent::StartDocument).unwrap();
        assert!(writer.finish().is_err());
    }
}
