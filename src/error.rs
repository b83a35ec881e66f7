//! Error types for snapshot import and reconciliation.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// One invalid field of one snapshot record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Location of the record, e.g. `products[3]` or `metadata`.
    pub record: String,
    /// Field name within the record.
    pub field: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.record, self.field, self.message)
    }
}

/// A snapshot that failed validation. Lists every violation, not just the first.
#[derive(Debug, Clone, Error)]
#[error("snapshot failed validation with {} violation(s): {}", .violations.len(), summarize(.violations))]
pub struct SchemaError {
    pub violations: Vec<SchemaViolation>,
}

impl SchemaError {
    pub fn single(record: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            violations: vec![SchemaViolation {
                record: record.to_string(),
                field: field.to_string(),
                message: message.into(),
            }],
        }
    }
}

fn summarize(violations: &[SchemaViolation]) -> String {
    const SHOWN: usize = 5;
    let mut parts: Vec<String> = violations.iter().take(SHOWN).map(|v| v.to_string()).collect();
    if violations.len() > SHOWN {
        parts.push(format!("... and {} more", violations.len() - SHOWN));
    }
    parts.join("; ")
}

/// Which kind of stored entity an identity conflict was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Category,
    Product,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::Category => "category",
            ConflictKind::Product => "product",
        }
    }
}

/// Errors raised while reconciling one snapshot against stored state.
///
/// Identity conflicts and constraint violations are recoverable: the import
/// records them and continues. Database errors abort the whole transaction.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("ambiguous {} identity '{key}': {} existing rows {candidates:?}", .kind.as_str(), .candidates.len())]
    IdentityConflict {
        kind: ConflictKind,
        key: String,
        /// Candidate row ids, earliest created first.
        candidates: Vec<i32>,
    },

    #[error("constraint violation on '{entity}': {message}")]
    ConstraintViolation { entity: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

impl ReconcileError {
    pub fn constraint(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

/// Top-level error returned by the import coordinator.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("transaction failed: {0}")]
    Transaction(#[from] DieselError),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("import cancelled")]
    Cancelled,
}

impl ImportError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether re-running the same snapshot may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ImportError::Transaction(_) | ImportError::Pool(_) | ImportError::Cancelled
        )
    }
}

impl From<ReconcileError> for ImportError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Database(e) => ImportError::Transaction(e),
            // Recoverable errors are handled inside the reconcilers; reaching
            // here means one escaped, so fail the transaction.
            other => ImportError::Transaction(DieselError::QueryBuilderError(other.to_string().into())),
        }
    }
}
