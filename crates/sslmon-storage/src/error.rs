/// Errors returned by [`DomainRegistry`](crate::DomainRegistry) and
/// [`CertificateSink`](crate::CertificateSink) implementations.
///
/// # Examples
///
/// ```rust
/// use sslmon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "domain",
///     id: "42".to_string(),
/// };
/// assert!(err.to_string().contains("domain"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A domain failed registry validation (empty name, interval out of range,
    /// duplicate host/port).
    #[error("Storage: invalid domain: {0}")]
    InvalidDomain(String),

    /// The backing store cannot serve requests right now.
    #[error("Storage: backend unavailable: {0}")]
    Unavailable(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
