//! Error types for mux link operations.
//!
//! Every failure surfaced to a caller of the link manager is a
//! [`MuxLinkError`]. Callers that only care about the broad class of a
//! failure (for instance to decide whether to retry with a larger budget)
//! should match on [`MuxLinkError::kind`].

use std::io;
use thiserror::Error;

/// Result type alias for mux link operations.
pub type MuxLinkResult<T> = Result<T, MuxLinkError>;

/// Broad classification of a [`MuxLinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad request: wrong base interface, unknown link, unknown mux id.
    InvalidArgs,
    /// The kernel does not expose the information needed and there is no
    /// fallback record.
    Unsupported,
    /// Generic operational failure.
    Failed,
    /// The control write succeeded but the effect never showed up.
    Timeout,
    /// Caller-initiated abort.
    Cancelled,
}

/// Errors that can occur while managing mux links.
#[derive(Debug, Error)]
pub enum MuxLinkError {
    /// The request itself is wrong and will never succeed as given.
    #[error("Invalid arguments: {message}")]
    InvalidArgs {
        /// Error message.
        message: String,
    },

    /// Required per-link information is not available.
    #[error("Unsupported: {message}")]
    Unsupported {
        /// Error message.
        message: String,
    },

    /// Generic operational failure.
    #[error("Operation failed: {message}")]
    Failed {
        /// Error message.
        message: String,
    },

    /// A sysfs read/write/enumeration failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The expected sysfs change did not happen within the budget.
    #[error("Timed out: {message}")]
    Timeout {
        /// Error message.
        message: String,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration file problem.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl MuxLinkError {
    /// Creates an invalid arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
        }
    }

    /// Creates an unsupported error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Creates a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wraps an IO error with the action that was being attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MuxLinkError::InvalidArgs { .. } => ErrorKind::InvalidArgs,
            MuxLinkError::Unsupported { .. } => ErrorKind::Unsupported,
            MuxLinkError::Timeout { .. } => ErrorKind::Timeout,
            MuxLinkError::Cancelled => ErrorKind::Cancelled,
            MuxLinkError::Failed { .. } | MuxLinkError::Io { .. } | MuxLinkError::Config { .. } => {
                ErrorKind::Failed
            }
        }
    }

    /// Returns true if retrying with a larger timeout budget may help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MuxLinkError::Timeout { .. })
    }
}
