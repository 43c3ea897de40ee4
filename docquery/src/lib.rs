//! Main docquery crate: a fluent, relational-style query builder for document databases.
//!
//! This crate is the primary entry point. It re-exports the core builder, compilers and
//! execution types, and provides access to the storage backends.
//!
//! # Features
//!
//! - **Fluent queries** - `select`, `and_where`, `or_where`, nested groups, `group_by`,
//!   `order_by`, `limit`, `offset` and `distinct`
//! - **Native compilation** - Where-trees become filter documents; grouped and aggregate reads
//!   become aggregation pipelines
//! - **Aggregates** - `count`, `sum`, `min`, `max`, `avg`
//! - **Writes** - `insert`, `insert_get_id`, `update`, `delete`
//! - **Transactions** - Scoped units of work that always end in commit or abort
//! - **Multiple backends** - In-memory and MongoDB stores behind one connection trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docquery::{prelude::*, memory::MemoryConnection};
//! use docquery::bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> DatabaseResult<()> {
//!     let db = Database::new(MemoryConnection::builder().build().await?);
//!     let users = db.collection("users").await?;
//!
//!     users
//!         .insert(vec![
//!             doc! { "name": "Ann", "age": 17, "status": "active" },
//!             doc! { "name": "Bob", "age": 20, "status": "active" },
//!         ])
//!         .await?;
//!
//!     let adults = users
//!         .new_query()
//!         .and_where("age", ">=", 18)
//!         .and_where("status", "=", "active")
//!         .order_by("name", "asc")
//!         .get(&["*"])
//!         .await?;
//!
//!     println!("adults: {adults:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! db.transaction(async || {
//!     let accounts = db.collection("accounts").await?;
//!     accounts
//!         .new_query()
//!         .and_where("_id", "=", "alice")
//!         .update(doc! { "$inc": { "balance": -10 } }, doc! {})
//!         .await?;
//!     accounts
//!         .new_query()
//!         .and_where("_id", "=", "bob")
//!         .update(doc! { "$inc": { "balance": 10 } }, doc! {})
//!         .await
//! })
//! .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory store for development and testing
//! - [`mongodb`] - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use docquery_core::{
    backend, builder, error, filter, operator, page, pipeline, query, record, runner, store,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend.
pub mod memory {
    pub use docquery_memory::{MemoryCollectionHandle, MemoryConnection, MemoryConnectionBuilder};
}

/// MongoDB storage backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docquery_mongodb::{
        MongoCollectionHandle, MongoConfig, MongoConnection, MongoConnectionBuilder,
    };
}
