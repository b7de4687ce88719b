use super::types::{Amount, InstallmentStatus, PaymentStatus};
use sled::transaction::TransactionError;

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid installment or installment not pending")]
    InvalidInstallmentState,
    #[error("Payment amount must match installment amount (expected {expected}, got {submitted})")]
    AmountMismatch { expected: Amount, submitted: Amount },
    #[error("{0}")]
    NotFound(&'static str),
    #[error("Payment has already been {0}")]
    AlreadyDecided(PaymentStatus),
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
    #[error("Unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },
    #[error("Installment status cannot change from {from} to {to}")]
    InvalidTransition {
        from: InstallmentStatus,
        to: InstallmentStatus,
    },
    #[error("Not allowed: {0}")]
    Unauthorized(String),
    #[error("'{0}' is not a valid amount")]
    InvalidAmount(String),
    #[error("Invalid installment schedule: {0}")]
    InvalidSchedule(String),
    #[error("Remaining balance is smaller than the approved amount")]
    BalanceUnderflow,
    #[error("Stored data is inconsistent: {0}")]
    DanglingReference(String),
    #[error("Failed to encode or decode a stored record: {0}")]
    Codec(String),
    #[error(transparent)]
    Storage(#[from] sled::Error),
}

/// Coarse classification of a failure, the way a transport layer maps it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    Integrity,
    Internal,
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::InvalidInstallmentState
            | WorkflowError::AmountMismatch { .. }
            | WorkflowError::InvalidAmount(_)
            | WorkflowError::InvalidReference(_)
            | WorkflowError::UnknownName { .. }
            | WorkflowError::InvalidSchedule(_)
            | WorkflowError::InvalidTransition { .. } => ErrorKind::Validation,
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::AlreadyDecided(_) => ErrorKind::Conflict,
            WorkflowError::Unauthorized(_) => ErrorKind::Forbidden,
            WorkflowError::DanglingReference(_) | WorkflowError::BalanceUnderflow => {
                ErrorKind::Integrity
            }
            WorkflowError::Codec(_) | WorkflowError::Storage(_) => ErrorKind::Internal,
        }
    }
}

impl From<TransactionError<WorkflowError>> for WorkflowError {
    fn from(value: TransactionError<WorkflowError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => WorkflowError::Storage(err),
        }
    }
}
