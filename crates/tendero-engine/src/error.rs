//! # Engine Error Type
//!
//! The error every engine operation returns.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Tendero                                │
//! │                                                                         │
//! │  CoreError (cart totals, transitions) ──┐                              │
//! │  ValidationError (field checks) ────────┼──► EngineError ──► caller    │
//! │  DbError (constraints, busy, pool) ─────┘        │                     │
//! │                                                  ▼                     │
//! │                                              ErrorKind                  │
//! │                                                                         │
//! │  kind               retryable   typical cause                          │
//! │  ─────────────────  ─────────   ─────────────────────────────────────  │
//! │  VALIDATION         no          empty cart, totals mismatch            │
//! │  NOT_FOUND          no          unknown product/customer/account       │
//! │  INSUFFICIENT_STOCK yes         re-read stock, shrink the cart         │
//! │  CONFLICT           yes         order already processed, lock timeout  │
//! │  UNAUTHORIZED       no          role lacks the permission              │
//! │  DATABASE           no          connection or query failure            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every error aborts the whole unit of work: the transaction is dropped
//! without commit, so nothing the operation wrote survives.

use serde::Serialize;
use thiserror::Error;

use tendero_core::{CoreError, ValidationError};
use tendero_db::DbError;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input rejected before anything was written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist (or is not visible in this store).
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A line asked for more units than the product has.
    ///
    /// ## User Workflow
    /// ```text
    /// Cart: 7 × Arroz 1kg, stock 4
    ///      │
    ///      ▼
    /// InsufficientStock { available: 4, requested: 7 }
    ///      │
    ///      ▼
    /// UI: "only 4 units of Arroz 1kg left"
    /// ```
    #[error("Insufficient stock for {name} ({product_id}): {available} available, {requested} requested")]
    InsufficientStock {
        product_id: String,
        name: String,
        available: i64,
        requested: i64,
    },

    /// The entity is not in a state that allows the operation, or another
    /// writer held the database past the busy timeout.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller's role in the store lacks the permission.
    #[error("User {user_id} is not allowed to {action} in store {store_id}")]
    Unauthorized {
        user_id: String,
        store_id: String,
        action: &'static str,
    },

    /// Infrastructure failure.
    #[error("Database error: {0}")]
    Database(DbError),
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientStock,
    Conflict,
    Unauthorized,
    Database,
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        EngineError::Conflict(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Unauthorized { .. } => ErrorKind::Unauthorized,
            EngineError::Database(_) => ErrorKind::Database,
        }
    }

    /// True when the same request may succeed if the caller re-reads and retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InsufficientStock | ErrorKind::Conflict
        )
    }
}

/// Converts database errors to engine errors.
///
/// ## Error Mapping
/// ```text
/// DbError::NotFound          → NotFound
/// DbError::UniqueViolation   → Conflict (lost a uniqueness race)
/// DbError::Busy / Pool       → Conflict (retryable)
/// DbError::CheckViolation    → Validation
/// Other                      → Database (logged)
/// ```
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        if err.is_contention() {
            return EngineError::Conflict(format!("{}; retry the operation", err));
        }

        match err {
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            DbError::UniqueViolation { field, .. } => {
                EngineError::Conflict(format!("{} already exists", field))
            }
            DbError::CheckViolation(message) => EngineError::Validation(message),
            other => {
                tracing::error!(error = %other, "Database operation failed");
                EngineError::Database(other)
            }
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

/// Converts core errors to engine errors.
impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTransition { .. } => EngineError::Conflict(err.to_string()),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
