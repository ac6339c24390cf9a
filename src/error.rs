use std::fmt;

use crate::storage::index::IndexKind;
use crate::storage::StoreError;

/// Errors surfaced by repositories and the care service.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthError {
    /// Missing or invalid principal, or a principal acting on another owner's records.
    Unauthorized,
    /// Profile or referenced parent entity is absent.
    NotFound(String),
    /// Out-of-range or missing required field. Raised before any write.
    Validation(String),
    /// Transient backend failure.
    StoreUnavailable(String),
    /// Stored records that the owner's index does not list.
    PartialIndexFailure { kind: IndexKind, missing: Vec<String> },
    /// A stored value that no longer decodes into its record type.
    Corrupted(String),
}

impl HealthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HealthError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        HealthError::NotFound(what.into())
    }
}

impl fmt::Display for HealthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthError::Unauthorized => write!(f, "Unauthorized"),
            HealthError::NotFound(what) => write!(f, "Not found: {}", what),
            HealthError::Validation(msg) => write!(f, "Validation error: {}", msg),
            HealthError::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            HealthError::PartialIndexFailure { kind, missing } => write!(
                f,
                "Index {} is missing {} stored record(s): {}",
                kind.index_prefix(),
                missing.len(),
                missing.join(", ")
            ),
            HealthError::Corrupted(msg) => write!(f, "Corrupted record: {}", msg),
        }
    }
}

impl std::error::Error for HealthError {}

impl From<StoreError> for HealthError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(msg) => HealthError::StoreUnavailable(msg),
            StoreError::Serialization(msg) => HealthError::Corrupted(msg),
        }
    }
}
