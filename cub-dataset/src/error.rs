//! The error taxonomy of dataset and inference operations.

use thiserror::Error;

/// Classified failures raised by the label store, the views and the inference service.
///
/// They are wrapped in [anyhow::Error] when propagated. Use
/// `err.downcast_ref::<DataError>()` to recover the class.
#[derive(Debug, Error)]
pub enum DataError {
    /// The raw dataset or a derived table is malformed. Not recoverable.
    #[error("data integrity error: {0}")]
    Integrity(String),
    /// A checkpoint or image file is absent or cannot be decoded.
    #[error("resource missing: {0}")]
    ResourceMissing(String),
    /// A caller violated a precondition.
    #[error("usage error: {0}")]
    Usage(String),
}

impl DataError {
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn resource_missing(msg: impl Into<String>) -> Self {
        Self::ResourceMissing(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    pub fn is_resource_missing(&self) -> bool {
        matches!(self, Self::ResourceMissing(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

/// Classify an [anyhow::Error] by the [DataError] it carries, if any.
pub fn data_error(err: &anyhow::Error) -> Option<&DataError> {
    err.chain().find_map(|cause| cause.downcast_ref::<DataError>())
}
