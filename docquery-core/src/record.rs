//! Conversions between typed values and records.
//!
//! A record is a plain [`bson::Document`]: an ordered map from field names to values. Any type
//! that implements serde's `Serialize` and `Deserialize` can be turned into a record and back
//! through [`RecordExt`], which is implemented for all such types.
//!
//! # Example
//!
//! ```ignore
//! use docquery::record::RecordExt;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     name: String,
//!     age: i32,
//! }
//!
//! let record = User { name: "Ann".into(), age: 30 }.to_record()?;
//! let user = User::from_record(record)?;
//! ```

use bson::{Document, de::deserialize_from_document, ser::serialize_to_document};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::error::{DatabaseError, DatabaseResult};

/// Record and JSON conversions for serde types.
pub trait RecordExt: Sized {
    /// Serializes the value into a record.
    ///
    /// # Errors
    ///
    /// Fails when the value does not serialize to a document (a bare string or number, say).
    fn to_record(&self) -> DatabaseResult<Document>;

    /// Deserializes a value from a record.
    fn from_record(record: Document) -> DatabaseResult<Self>;

    fn to_json(&self) -> DatabaseResult<Value>;

    fn from_json(value: Value) -> DatabaseResult<Self>;
}

impl<T: Serialize + DeserializeOwned> RecordExt for T {
    fn to_record(&self) -> DatabaseResult<Document> {
        serialize_to_document(self)
            .map_err(|err| DatabaseError::InvalidDocument(err.to_string()))
    }

    fn from_record(record: Document) -> DatabaseResult<Self> {
        Ok(deserialize_from_document(record)?)
    }

    fn to_json(&self) -> DatabaseResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DatabaseResult<Self> {
        Ok(from_value(value)?)
    }
}
