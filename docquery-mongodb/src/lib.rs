//! MongoDB backend for docquery.
//!
//! This crate implements the `Connection` and `CollectionHandle` traits on top of the official
//! async MongoDB driver. Compiled filters and pipelines are sent to the server as they are;
//! option documents are mapped onto the driver's typed options.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docquery = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Server-side evaluation** - Filters, pipelines and distinct run on the server
//! - **Transactions** - A client session is started on `begin_transaction` and every handle
//!   joins it until commit or abort
//! - **Indexing** - Listing, creating and dropping indexes
//!
//! # Example
//!
//! ```ignore
//! use docquery::{backend::ConnectionBuilder, mongodb::MongoConnection, store::Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = MongoConnection::builder("mongodb://localhost:27017", "my_database")
//!         .with_app_name("reports")
//!         .build()
//!         .await?;
//!     let db = Database::new(connection);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docquery_mongodb;

pub mod config;
pub mod store;

mod options;

pub use config::MongoConfig;
pub use store::{MongoCollectionHandle, MongoConnection, MongoConnectionBuilder};
