use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A tenant identifier was empty or whitespace only.
    EmptyTenantId,
    /// Staleness thresholds were negative or not strictly increasing.
    InvalidThresholds(String),
    /// A derived timestamp fell outside the representable range.
    TimestampOutOfRange(String),
    /// A textual value did not name a known variant.
    UnknownVariant { kind: &'static str, value: String },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::EmptyTenantId => {
                write!(f, "tenant id cannot be empty")
            }
            ModelError::InvalidThresholds(msg) => {
                write!(f, "invalid staleness thresholds: {msg}")
            }
            ModelError::TimestampOutOfRange(what) => {
                write!(f, "timestamp out of range: {what}")
            }
            ModelError::UnknownVariant { kind, value } => {
                write!(f, "unknown {kind}: '{value}'")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
