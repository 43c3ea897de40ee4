//! Error types and result types for query compilation and execution.
//!
//! Every fallible operation in the workspace returns [`DatabaseResult<T>`]. Errors fall in
//! three groups: compilation errors raised before the store is contacted, execution errors
//! reported by the store and propagated unchanged, and transaction state errors.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when compiling or running a query.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A where clause used an operator symbol that has no native translation.
    #[error("Unsupported operator '{operator}' in where clause on field '{field}'")]
    UnsupportedOperator {
        field: String,
        operator: String,
    },
    /// A where clause supplied a value whose shape does not fit its operator.
    #[error("Invalid operand for '{operator}' on field '{field}': {reason}")]
    InvalidOperand {
        field: String,
        operator: String,
        reason: String,
    },
    /// Serialization/deserialization error when converting between record formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during connection set-up.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An insert or update payload has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The requested collection does not exist.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// A write collided with an existing primary key.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    /// An error occurred in the underlying store.
    #[error("Backend error: {0}")]
    Backend(String),
    /// `begin_transaction` was called while another transaction is active.
    #[error("A transaction is already active")]
    TransactionAlreadyActive,
    /// `commit` or `abort` was called with no active transaction.
    #[error("No active transaction")]
    NoActiveTransaction,
    /// The store rejected a transaction state transition.
    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl DatabaseError {
    /// Returns `true` for errors raised while compiling a query, before any store call.
    pub fn is_compilation(&self) -> bool {
        matches!(
            self,
            DatabaseError::UnsupportedOperator { .. } | DatabaseError::InvalidOperand { .. },
        )
    }
}

/// A specialized `Result` type for query operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

impl From<BsonError> for DatabaseError {
    fn from(err: BsonError) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DatabaseError {
    fn from(err: SerdeJsonError) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}
