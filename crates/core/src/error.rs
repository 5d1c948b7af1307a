//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// One variant per failure kind the clinical/billing core can produce, so
/// callers can distinguish retryable losses (stale version, claimed line)
/// from terminal input/state problems without parsing messages.
/// Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, negative price).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation is not legal for the entity's current lifecycle state
    /// (e.g. editing an invoiced treatment, charting an extracted tooth).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// Optimistic concurrency loss: the caller's version is stale. Retry
    /// with fresh data.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// A selected treatment line was claimed by another invoice commit since
    /// the preview was taken. Re-preview and retry.
    #[error("stale line: {0}")]
    StaleLine(String),

    /// An invoice commit selected no eligible treatment lines.
    #[error("no eligible treatment lines selected")]
    EmptySelection,

    /// A payment would push the amount collected past the invoice total.
    #[error("overpayment rejected: {0}")]
    OverpaymentRejected(String),

    /// The patient already has a current (non-archived) odontogram.
    #[error("duplicate active odontogram: {0}")]
    DuplicateActiveOdontogram(String),

    /// The treatment catalog has no entry for the given code.
    #[error("unknown treatment code: {0}")]
    UnknownTreatmentCode(String),

    /// The invoice was already cancelled.
    #[error("invoice is already cancelled")]
    AlreadyCancelled,

    /// The invoice is fully paid; cancellation requires a refund workflow.
    #[error("invoice is fully paid")]
    AlreadyPaid,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn concurrent_modification(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn stale_line(msg: impl Into<String>) -> Self {
        Self::StaleLine(msg.into())
    }

    pub fn overpayment(msg: impl Into<String>) -> Self {
        Self::OverpaymentRejected(msg.into())
    }

    pub fn duplicate_active_odontogram(msg: impl Into<String>) -> Self {
        Self::DuplicateActiveOdontogram(msg.into())
    }

    pub fn unknown_treatment_code(code: impl Into<String>) -> Self {
        Self::UnknownTreatmentCode(code.into())
    }

    /// Whether the caller can expect a retry (with fresh data) to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::ConcurrentModification(_) | DomainError::StaleLine(_)
        )
    }
}
