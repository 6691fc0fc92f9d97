use std::time::Duration;

/// Publisher-level errors for Transat.
///
/// Transient write failures never show up here: the retry loop absorbs them.
/// What does show up is the loop giving up (budget, deadline, cancellation)
/// or a backend that cannot answer a read.
#[derive(Debug, thiserror::Error)]
pub enum TransatError {
    #[error("delivery to {backend} failed after {attempts} attempts")]
    DeliveryFailed { backend: String, attempts: u32 },

    #[error("delivery to {backend} timed out after {elapsed:?} ({attempts} attempts)")]
    DeliveryTimeout {
        backend: String,
        elapsed: Duration,
        attempts: u32,
    },

    #[error("delivery to {backend} cancelled after {attempts} attempts")]
    Cancelled { backend: String, attempts: u32 },

    #[error("backend {backend} read failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: StorageError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TransatError {
    /// Name of the backend that stopped the delivery, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            TransatError::DeliveryFailed { backend, .. }
            | TransatError::DeliveryTimeout { backend, .. }
            | TransatError::Cancelled { backend, .. }
            | TransatError::Backend { backend, .. } => Some(backend),
            TransatError::Config(_) => None,
        }
    }
}

/// Errors a storage backend may report from `holds`.
///
/// `store` has no error channel on purpose: a dropped write looks exactly
/// like a successful one at the call site.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}
