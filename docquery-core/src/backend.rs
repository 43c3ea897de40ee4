//! The boundary between the query runner and a concrete document store.
//!
//! The runner never talks to a driver directly. It compiles queries into native documents and
//! hands them to two object-safe traits:
//!
//! - [`CollectionHandle`]: reads and writes against one collection
//! - [`Connection`]: collection and index administration plus transaction state
//!
//! Implementations are required to be thread-safe (`Send + Sync`) so a connection can be
//! shared across async tasks.
//!
//! # Example
//!
//! ```ignore
//! use docquery::backend::Connection;
//! use bson::doc;
//!
//! let users = connection.collection("users").await?;
//! let rows = users.find(doc! { "age": { "$gte": 18 } }, doc! { "limit": 10_i64 }).await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::{fmt::Debug, sync::Arc};

use crate::error::DatabaseResult;

/// Result of a single-document insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneOutcome {
    pub acknowledged: bool,
    /// The primary key the store assigned or kept.
    pub inserted_id: Bson,
}

/// Result of a batch insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyOutcome {
    pub acknowledged: bool,
    /// Primary keys in insertion order.
    pub inserted_ids: Vec<Bson>,
}

/// Result of an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
}

/// Result of a delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteOutcome {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

/// Description of an index on a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    /// Key pattern, e.g. `{ "email": 1 }`.
    pub keys: Document,
    pub unique: bool,
}

/// Native operations against a single collection.
///
/// Options are passed as documents so that caller-supplied options can override any key the
/// runner computed. Implementations should ignore keys they do not understand.
#[async_trait]
pub trait CollectionHandle: Send + Sync + Debug {
    /// Name of the collection this handle targets.
    fn name(&self) -> &str;

    /// Runs a filtered read. Recognised options: `projection`, `sort`, `skip`, `limit`.
    async fn find(&self, filter: Document, options: Document) -> DatabaseResult<Vec<Document>>;

    /// Runs an aggregation pipeline.
    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Document,
    ) -> DatabaseResult<Vec<Document>>;

    /// Returns the distinct values of `field` among documents matching `filter`.
    async fn distinct(&self, field: &str, filter: Option<Document>) -> DatabaseResult<Vec<Bson>>;

    async fn insert_one(&self, document: Document) -> DatabaseResult<InsertOneOutcome>;

    async fn insert_many(&self, documents: Vec<Document>) -> DatabaseResult<InsertManyOutcome>;

    /// Applies `update` to matching documents. Recognised options: `multiple` (defaults to
    /// `true`), `upsert`.
    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Document,
    ) -> DatabaseResult<UpdateOutcome>;

    async fn delete_many(&self, filter: Document) -> DatabaseResult<DeleteOutcome>;
}

/// Collection administration and transaction control for one database.
#[async_trait]
pub trait Connection: Send + Sync + Debug {
    async fn has_collection(&self, name: &str) -> DatabaseResult<bool>;

    async fn get_collections(&self) -> DatabaseResult<Vec<String>>;

    /// Returns a handle to the named collection. The collection need not exist yet.
    async fn collection(&self, name: &str) -> DatabaseResult<Arc<dyn CollectionHandle>>;

    async fn create_collection(&self, name: &str, options: Document) -> DatabaseResult<()>;

    async fn drop_collection(&self, name: &str) -> DatabaseResult<()>;

    async fn has_index(&self, collection: &str, name: &str) -> DatabaseResult<bool>;

    async fn get_indexes(&self, collection: &str) -> DatabaseResult<Vec<IndexInfo>>;

    /// Creates an index and returns its name. Recognised options: `name`, `unique`.
    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        options: Document,
    ) -> DatabaseResult<String>;

    async fn drop_index(&self, collection: &str, name: &str) -> DatabaseResult<()>;

    /// Starts a transaction. Subsequent collection operations run inside it.
    async fn begin_transaction(&self) -> DatabaseResult<()>;

    async fn commit(&self) -> DatabaseResult<()>;

    async fn abort(&self) -> DatabaseResult<()>;

    /// Releases the connection.
    async fn shutdown(self) -> DatabaseResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Factory trait for creating connections from configuration.
#[async_trait]
pub trait ConnectionBuilder {
    type Connection: Connection;

    async fn build(self) -> DatabaseResult<Self::Connection>;
}

/// Option keys a backend honours for `find`.
pub const FIND_OPTIONS: &[&str] = &[
    "projection",
    "sort",
    "skip",
    "limit",
    "maxTimeMS",
    "batchSize",
    "allowDiskUse",
    "hint",
];

/// Option keys a backend honours for `aggregate`.
pub const AGGREGATE_OPTIONS: &[&str] = &["maxTimeMS", "batchSize", "allowDiskUse", "hint"];

/// Option keys a backend honours for `update_many`.
pub const UPDATE_OPTIONS: &[&str] = &["multiple", "upsert"];

/// Logs a warning for every option key outside `recognised`.
pub fn warn_unknown_options(options: &Document, recognised: &[&str], operation: &str) {
    for key in options.keys() {
        if !recognised.contains(&key.as_str()) {
            log::warn!("ignoring unknown {operation} option '{key}'");
        }
    }
}

/// Reads a non-negative integer option, accepting any numeric BSON type.
pub fn option_u64(options: &Document, key: &str) -> Option<u64> {
    match options.get(key)? {
        Bson::Int32(value) => u64::try_from(*value).ok(),
        Bson::Int64(value) => u64::try_from(*value).ok(),
        Bson::Double(value) if *value >= 0.0 => Some(*value as u64),
        _ => None,
    }
}

/// Reads a boolean option, falling back to `default` when absent or not a boolean.
pub fn option_bool(options: &Document, key: &str, default: bool) -> bool {
    options.get_bool(key).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn numeric_options_accept_any_integer_type() {
        let options = doc! { "a": 3, "b": 4_i64, "c": 5.0, "d": -1, "e": "x" };

        assert_eq!(option_u64(&options, "a"), Some(3));
        assert_eq!(option_u64(&options, "b"), Some(4));
        assert_eq!(option_u64(&options, "c"), Some(5));
        assert_eq!(option_u64(&options, "d"), None);
        assert_eq!(option_u64(&options, "e"), None);
        assert_eq!(option_u64(&options, "missing"), None);
    }

    #[test]
    fn boolean_options_fall_back() {
        let options = doc! { "multiple": false, "upsert": 1 };

        assert!(!option_bool(&options, "multiple", true));
        assert!(option_bool(&options, "upsert", true));
        assert!(option_bool(&options, "missing", true));
    }
}
