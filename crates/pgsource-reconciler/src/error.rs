//! Reconciler error types and their condition reasons.

use thiserror::Error;

use pgsource_schema::SchemaError;
use pgsource_state::StateError;

pub const REASON_TRANSIENT: &str = "Transient";
pub const REASON_MISSING_DEPENDENCY: &str = "MissingDependency";
pub const REASON_DDL_FAILED: &str = "DdlFailed";
pub const REASON_INVALID_IDENTIFIER: &str = "InvalidIdentifier";
pub const REASON_CANCELLED: &str = "Cancelled";
pub const REASON_RECEIVER_UNAVAILABLE: &str = "ReceiverUnavailable";
pub const REASON_BINDING_NOT_READY: &str = "BindingNotReady";
pub const REASON_FINALIZE_FAILED: &str = "FinalizeFailed";

/// Why a reconcile or finalize run stopped early.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("table {0} does not exist")]
    MissingTable(String),

    /// A workload or binding collaborator could not be reached.
    #[error("collaborator unavailable: {0}")]
    Collaborator(String),

    #[error("cancelled")]
    Cancelled,
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

impl ReconcileError {
    /// Condition reason recorded for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Schema(SchemaError::Statement { .. }) => REASON_DDL_FAILED,
            ReconcileError::Schema(SchemaError::InvalidIdentifier(_)) => REASON_INVALID_IDENTIFIER,
            ReconcileError::Schema(_) => REASON_TRANSIENT,
            ReconcileError::State(_) | ReconcileError::Collaborator(_) => REASON_TRANSIENT,
            ReconcileError::MissingTable(_) => REASON_MISSING_DEPENDENCY,
            ReconcileError::Cancelled => REASON_CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReconcileError::Cancelled)
    }
}
