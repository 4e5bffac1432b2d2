//! Depth-first write-event protocol
//!
//! Encoders never walk a document themselves. [`traverse`] walks it once,
//! iteratively, and pushes a flat stream of [`WriteEvent`]s into an
//! [`EventWriter`]. Both the JSON and the tabular writer consume the same
//! stream.
//!
//! # Ordering rule
//!
//! The protocol is *name-before-open*: inside a document, `FieldName(name)`
//! is emitted immediately before the event that opens or carries the value
//! it names (`Scalar`, `StartDocument` or `StartArray`). Array elements are
//! never named; writers address them by position.
//!
//! ```text
//! {a: 1, b: [true, {c: "x"}]}
//!
//! StartDocument
//!   FieldName("a") Scalar(1)
//!   FieldName("b") StartArray
//!     Scalar(true)
//!     StartDocument FieldName("c") Scalar("x") EndDocument
//!   EndArray
//! EndDocument
//! ```

use bson::{Bson, Document, document};

use crate::error::EncodeError;

/// One step of the traversal protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteEvent<'a> {
    StartDocument,
    EndDocument,
    StartArray,
    EndArray,
    /// Names the next value in the enclosing document.
    FieldName(&'a str),
    /// Any non-container value, including `Null`.
    Scalar(&'a Bson),
}

/// Push-based consumer of a [`WriteEvent`] stream describing one document.
pub trait EventWriter {
    /// What the writer produces once the top-level document is closed.
    type Output;

    /// Consume one event.
    fn write_event(&mut self, event: WriteEvent<'_>) -> Result<(), EncodeError>;

    /// Return the finished output.
    ///
    /// Fails if the top-level document has not been closed yet.
    fn finish(self) -> Result<Self::Output, EncodeError>;
}

enum Level<'a> {
    Document(document::Iter<'a>),
    Array(std::slice::Iter<'a, Bson>),
}

enum Step<'a> {
    Field(&'a str, &'a Bson),
    Element(&'a Bson),
    Close(WriteEvent<'static>),
}

/// Emit the event stream for `doc` into `writer`.
///
/// Uses an explicit stack of iterators, so nesting depth is bounded by heap
/// memory rather than the call stack.
pub fn traverse<W>(doc: &Document, writer: &mut W) -> Result<(), EncodeError>
where
    W: EventWriter + ?Sized,
{
    let mut stack: Vec<Level<'_>> = Vec::with_capacity(8);

    writer.write_event(WriteEvent::StartDocument)?;
    stack.push(Level::Document(doc.iter()));

    loop {
        let step = match stack.last_mut() {
            None => break,
            Some(Level::Document(iter)) => match iter.next() {
                Some((key, value)) => Step::Field(key.as_str(), value),
                None => Step::Close(WriteEvent::EndDocument),
            },
            Some(Level::Array(iter)) => match iter.next() {
                Some(value) => Step::Element(value),
                None => Step::Close(WriteEvent::EndArray),
            },
        };

        match step {
            Step::Field(key, value) => {
                writer.write_event(WriteEvent::FieldName(key))?;
                open_value(value, writer, &mut stack)?;
            }
            Step::Element(value) => open_value(value, writer, &mut stack)?,
            Step::Close(event) => {
                stack.pop();
                writer.write_event(event)?;
            }
        }
    }

    Ok(())
}

/// Traverse `doc` into a fresh writer and return its output.
pub fn encode_with<W: EventWriter>(doc: &Document, mut writer: W) -> Result<W::Output, EncodeError> {
    traverse(doc, &mut writer)?;
    writer.finish()
}

fn open_value<'a, W>(
    value: &'a Bson,
    writer: &mut W,
    stack: &mut Vec<Level<'a>>,
) -> Result<(), EncodeError>
where
    W: EventWriter + ?Sized,
{
    match value {
        Bson::Document(nested) => {
            writer.write_event(WriteEvent::StartDocument)?;
            stack.push(Level::Document(nested.iter()));
        }
        Bson::Array(items) => {
            writer.write_event(WriteEvent::StartArray)?;
            stack.push(Level::Array(items.iter()));
        }
        scalar => writer.write_event(WriteEvent::Scalar(scalar))?,
    }
    Ok(())
}
