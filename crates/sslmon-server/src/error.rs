use sslmon_common::types::CheckErrorKind;
use std::time::Duration;

/// Why a single certificate inspection failed.
///
/// The inspector never returns this to its callers; it is folded into an
/// `ERROR` record through [`CheckError::kind`] and its `Display` text.
///
/// # Examples
///
/// ```rust
/// use sslmon_server::error::CheckError;
/// use sslmon_common::types::CheckErrorKind;
///
/// let err = CheckError::Handshake("received fatal alert: HandshakeFailure".into());
/// assert_eq!(err.kind(), CheckErrorKind::Handshake);
/// assert!(err.to_string().starts_with("TLS handshake failed"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// DNS resolution or TCP connect failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection timed out after {}ms", .0.as_millis())]
    ConnectTimeout(Duration),

    /// TLS negotiation failed, including servers that reject our hello.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("TLS handshake timed out after {}ms", .0.as_millis())]
    HandshakeTimeout(Duration),

    /// Anything else: invalid server name, empty peer chain, unparsable
    /// certificate.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl CheckError {
    pub fn kind(&self) -> CheckErrorKind {
        match self {
            Self::Connection(_) | Self::ConnectTimeout(_) => CheckErrorKind::Connection,
            Self::Handshake(_) | Self::HandshakeTimeout(_) => CheckErrorKind::Handshake,
            Self::Unexpected(_) => CheckErrorKind::Unexpected,
        }
    }
}

/// Failure to hand a job to the [`WorkerPool`](crate::cert::pool::WorkerPool).
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// All workers are gone; the pool accepts no more work.
    #[error("Pool: worker pool is closed")]
    Closed,

    #[error("Pool: invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Batch-level failure of the [`BulkCoordinator`](crate::cert::coordinator::BulkCoordinator).
/// Per-domain failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Bulk check: failed to submit check for {domain}: {source}")]
    Submit {
        domain: String,
        #[source]
        source: PoolError,
    },

    /// Only raised under `DeadlinePolicy::FailBatch`.
    #[error("Bulk check: deadline of {}s exceeded with {completed}/{total} checks completed", .timeout.as_secs())]
    DeadlineExceeded {
        timeout: Duration,
        completed: usize,
        total: usize,
    },
}
