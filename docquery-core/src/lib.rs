//! A fluent query builder for document databases.
//!
//! This crate is the core of the docquery project and provides:
//!
//! - **Query state** ([`query`]) - The where-tree, orders, groups and aggregate specs a builder accumulates
//! - **Builder** ([`builder`]) - Chainable construction of query state
//! - **Filter compilation** ([`filter`]) - Where-tree to native filter document
//! - **Pipeline compilation** ([`pipeline`]) - Grouped and aggregate reads as an aggregation pipeline
//! - **Execution** ([`runner`]) - Reads, aggregates and writes through a collection handle
//! - **Backend boundary** ([`backend`]) - Traits a concrete document store implements
//! - **Database** ([`store`]) - Collection access, administration and transactions
//! - **Records** ([`record`]) - Conversions between serde types and records
//! - **Pagination** ([`page`]) - Page parameters and result pages
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docquery_core::store::Database;
//!
//! let db = Database::new(connection);
//! let names = db
//!     .collection("users")
//!     .await?
//!     .select(["name"])
//!     .and_where("age", ">", 21)
//!     .or_where("role", "=", "admin")
//!     .order_by("name", "asc")
//!     .limit(10)
//!     .get(&["*"])
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docquery_core;

pub mod backend;
pub mod builder;
pub mod error;
pub mod filter;
pub mod operator;
pub mod page;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod runner;
pub mod store;
