//! Document encoders
//!
//! An encoder turns one document into the bytes of one output line (without
//! the line terminator). Both encoders drive their writer through the shared
//! event traversal in [`crate::export::traversal`].

use mongodb::bson::Document;

use crate::error::EncodeError;

pub mod jsonl;
pub mod tabular;

pub use jsonl::{JsonEncoder, JsonFormat, JsonWriter};
pub use tabular::{DateFormat, TabularEncoder, TabularWriter};

/// Trait for turning a document into one output line.
///
/// Encoders are stateless per document and shared read-only across workers.
pub trait DocumentEncoder: Send + Sync {
    /// Encode a document
    ///
    /// # Arguments
    /// * `doc` - Document to encode
    ///
    /// # Returns
    /// * `Result<Vec<u8>, EncodeError>` - Line bytes, without newline
    fn encode(&self, doc: &Document) -> Result<Vec<u8>, EncodeError>;

    /// Header line written once before any data, if the format has one.
    fn header(&self) -> Option<String> {
        None
    }
}
