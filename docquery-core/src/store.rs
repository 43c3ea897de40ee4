//! The database entry point.
//!
//! [`Database`] owns a [`Connection`] and hands out [`Builder`]s for its collections. It also
//! forwards collection and index administration, and tracks transaction state so that
//! transactions cannot nest.
//!
//! # Example
//!
//! ```ignore
//! use docquery::store::Database;
//! use docquery_memory::MemoryConnection;
//!
//! let db = Database::new(MemoryConnection::new());
//! let adults = db
//!     .collection("users")
//!     .await?
//!     .and_where("age", ">=", 18)
//!     .get(&["*"])
//!     .await?;
//! ```

use bson::Document;
use mea::rwlock::RwLock;

use crate::{
    backend::{Connection, IndexInfo},
    builder::Builder,
    error::{DatabaseError, DatabaseResult},
};

/// Where the most recent transaction stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started.
    #[default]
    None,
    Active,
    Committed,
    Aborted,
}

/// A database bound to a specific connection implementation.
///
/// # Type Parameters
///
/// * `C` - The connection implementation type
#[derive(Debug)]
pub struct Database<C: Connection> {
    connection: C,
    transaction: RwLock<TransactionState>,
}

impl<C: Connection> Database<C> {
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            transaction: RwLock::new(TransactionState::None),
        }
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Starts a query against the named collection.
    pub async fn collection(&self, name: &str) -> DatabaseResult<Builder> {
        let handle = self.connection.collection(name).await?;
        Ok(Builder::new(handle))
    }

    pub async fn has_collection(&self, name: &str) -> DatabaseResult<bool> {
        self.connection.has_collection(name).await
    }

    /// Lists collection names.
    pub async fn get_collections(&self) -> DatabaseResult<Vec<String>> {
        self.connection.get_collections().await
    }

    pub async fn create_collection(&self, name: &str, options: Document) -> DatabaseResult<()> {
        self.connection
            .create_collection(name, options)
            .await
    }

    pub async fn drop_collection(&self, name: &str) -> DatabaseResult<()> {
        self.connection.drop_collection(name).await
    }

    pub async fn has_index(&self, collection: &str, name: &str) -> DatabaseResult<bool> {
        self.connection.has_index(collection, name).await
    }

    pub async fn get_indexes(&self, collection: &str) -> DatabaseResult<Vec<IndexInfo>> {
        self.connection.get_indexes(collection).await
    }

    /// Creates an index and returns the name the store gave it.
    pub async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        options: Document,
    ) -> DatabaseResult<String> {
        self.connection
            .create_index(collection, keys, options)
            .await
    }

    pub async fn drop_index(&self, collection: &str, name: &str) -> DatabaseResult<()> {
        self.connection
            .drop_index(collection, name)
            .await
    }

    pub async fn transaction_state(&self) -> TransactionState {
        *self.transaction.read().await
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::TransactionAlreadyActive`] when a transaction is already open.
    pub async fn begin_transaction(&self) -> DatabaseResult<()> {
        let mut state = self.transaction.write().await;
        if *state == TransactionState::Active {
            return Err(DatabaseError::TransactionAlreadyActive);
        }

        self.connection.begin_transaction().await?;
        *state = TransactionState::Active;
        log::debug!("transaction started");

        Ok(())
    }

    /// Commits the active transaction. A failed commit leaves the transaction active so that
    /// it can still be aborted.
    pub async fn commit(&self) -> DatabaseResult<()> {
        let mut state = self.transaction.write().await;
        if *state != TransactionState::Active {
            return Err(DatabaseError::NoActiveTransaction);
        }

        self.connection.commit().await?;
        *state = TransactionState::Committed;
        log::debug!("transaction committed");

        Ok(())
    }

    /// Aborts the active transaction. The transaction counts as finished even when the store
    /// reports an error while aborting.
    pub async fn abort(&self) -> DatabaseResult<()> {
        let mut state = self.transaction.write().await;
        if *state != TransactionState::Active {
            return Err(DatabaseError::NoActiveTransaction);
        }

        *state = TransactionState::Aborted;
        self.connection.abort().await?;
        log::debug!("transaction aborted");

        Ok(())
    }

    /// Runs `unit_of_work` inside a transaction.
    ///
    /// Commits when the unit of work succeeds. When it fails, or the commit fails, the
    /// transaction is aborted and the original error is returned.
    ///
    /// ```ignore
    /// let moved = db
    ///     .transaction(async || {
    ///         let accounts = db.collection("accounts").await?;
    ///         accounts.clone().and_where("_id", "=", from).update(doc! { "$inc": { "balance": -10 } }, doc! {}).await?;
    ///         accounts.and_where("_id", "=", to).update(doc! { "$inc": { "balance": 10 } }, doc! {}).await
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<F, T>(&self, unit_of_work: F) -> DatabaseResult<T>
    where
        F: AsyncFnOnce() -> DatabaseResult<T>,
    {
        self.begin_transaction().await?;

        let result = match unit_of_work().await {
            Ok(value) => match self.commit().await {
                Ok(()) => return Ok(value),
                Err(err) => err,
            },
            Err(err) => err,
        };

        log::warn!("rolling back transaction: {result}");
        if let Err(abort_err) = self.abort().await {
            log::error!("failed to abort transaction: {abort_err}");
        }

        Err(result)
    }

    /// Consumes the database and releases the connection.
    pub async fn shutdown(self) -> DatabaseResult<()> {
        self.connection.shutdown().await
    }
}
