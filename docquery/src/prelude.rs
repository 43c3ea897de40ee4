//! Convenient re-exports of commonly used types from docquery.
//!
//! ```ignore
//! use docquery::prelude::*;
//! ```

pub use docquery_core::{
    backend::{CollectionHandle, Connection, ConnectionBuilder, IndexInfo},
    builder::Builder,
    error::{DatabaseError, DatabaseResult},
    page::{Page, PaginationParams},
    query::{AggregateFunction, Connective, SortDirection, WhereNode},
    record::RecordExt,
    store::{Database, TransactionState},
};
