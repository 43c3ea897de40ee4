//! In-memory document store for docquery.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Connection` and
//! `CollectionHandle` traits. It evaluates the same native filter documents and aggregation
//! pipelines the query builder sends to a real document store, which makes it suitable for
//! development and as the fixture store in tests.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Native filters** - Comparison, logical, array and regex operators
//! - **Pipelines** - `$match`, `$unwind`, `$group`, `$sort`, `$skip`, `$limit`, `$project`
//! - **Indexes** - Named indexes with unique key enforcement
//! - **Transactions** - Snapshot on begin, restore on abort
//!
//! # Quick Start
//!
//! ```ignore
//! use docquery::{store::Database, memory::MemoryConnection};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(MemoryConnection::new());
//!     let users = db.collection("users").await?;
//!
//!     users.insert(doc! { "name": "Alice", "age": 30 }).await?;
//!     let adults = users.and_where("age", ">=", 18).count().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docquery_memory;

mod aggregation;
mod evaluator;
mod update;

pub mod store;

pub use store::{MemoryCollectionHandle, MemoryConnection, MemoryConnectionBuilder};
