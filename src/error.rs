use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuietboxError {
    #[error("No cryptographic provider available: {0}")]
    ProviderUnavailable(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Covers tampering, a stale recipient key and an unusable ephemeral key alike.
    #[error("Decryption failed")]
    Decryption,

    #[error("Incorrect password")]
    Authentication,

    #[error("Secure storage error: {0}")]
    Storage(String),

    #[error("Key directory error: {0}")]
    Directory(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Cannot determine home directory")]
    HomeDirNotFound,

    #[error("Failed to write key store item atomically")]
    AtomicWriteFailed(#[source] std::io::Error),
}

impl QuietboxError {
    /// Stable, content-free name of the error kind. Safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            QuietboxError::ProviderUnavailable(_) => "provider_unavailable",
            QuietboxError::KeyNotFound(_) => "key_not_found",
            QuietboxError::Decryption => "decryption",
            QuietboxError::Authentication => "authentication",
            QuietboxError::Storage(_) => "storage",
            QuietboxError::Directory(_) => "directory",
            QuietboxError::InvalidKey(_) => "invalid_key",
            QuietboxError::Malformed(_) => "malformed",
            QuietboxError::Encryption => "encryption",
            QuietboxError::HomeDirNotFound => "home_dir_not_found",
            QuietboxError::AtomicWriteFailed(_) => "atomic_write_failed",
        }
    }

    /// True for failures a caller may retry later (recipient has not published a key yet).
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuietboxError::KeyNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, QuietboxError>;

/// Emit a failure event carrying only the operation name and error kind.
pub(crate) fn log_failure(operation: &'static str, err: &QuietboxError) {
    tracing::warn!(operation, kind = err.kind(), "operation failed");
}
