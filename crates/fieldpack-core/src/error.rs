use thiserror::Error;

/// Failure taxonomy for one resolution or build. Boundary layers downcast
/// `anyhow::Error` to this type to decide the client-facing mapping.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid version string: {0}")]
    InvalidVersion(String),

    #[error("stored update asset has an unexpected extension: {0}")]
    CorruptAsset(String),

    #[error("dependency cycle detected involving: {0}")]
    DependencyCycle(String),

    #[error("upgrade source directory missing: {0}")]
    SourceMissing(String),

    #[error("size mismatch copying {path}: expected {expected} bytes, got {actual}")]
    IntegrityMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("no writable cache location for app '{0}'")]
    PermissionDenied(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// True when the boundary layer should answer with a "not found"
    /// equivalent rather than a generic server failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidVersion(_))
    }
}
