//! Error types for object store operations

use std::fmt;
use std::io;

/// Result type alias for object store operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Error type shared by every object store implementation
#[derive(Debug)]
pub enum BackendError {
    /// I/O error occurred during a store operation
    Io(io::Error),

    /// Object or bucket not found
    NotFound { key: String, backend: String },

    /// Permission denied accessing resource
    PermissionDenied { key: String, message: String },

    /// Authentication failed
    AuthenticationFailed { backend: String, message: String },

    /// Connection to the store failed
    ConnectionFailed {
        backend: String,
        endpoint: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out
    Timeout {
        operation: String,
        duration_secs: u64,
    },

    /// Invalid configuration for the store
    InvalidConfig { backend: String, message: String },

    /// Key is malformed or escapes the store root
    InvalidKey { key: String, reason: String },

    /// Network error during remote operation
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic store error with context
    Other { backend: String, message: String },
}

impl BackendError {
    /// Check if this error is retriable (transient)
    pub fn is_retriable(&self) -> bool {
        match self {
            BackendError::Timeout { .. } => true,
            BackendError::ConnectionFailed { .. } => true,
            BackendError::Network { .. } => true,
            BackendError::Io(e) => {
                matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::WouldBlock
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                )
            }

            BackendError::NotFound { .. } => false,
            BackendError::PermissionDenied { .. } => false,
            BackendError::AuthenticationFailed { .. } => false,
            BackendError::InvalidConfig { .. } => false,
            BackendError::InvalidKey { .. } => false,
            BackendError::Other { .. } => false,
        }
    }

    /// Check if this error indicates the object was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    /// Get the store name associated with this error, if any
    pub fn backend_name(&self) -> Option<&str> {
        match self {
            BackendError::NotFound { backend, .. } => Some(backend),
            BackendError::AuthenticationFailed { backend, .. } => Some(backend),
            BackendError::ConnectionFailed { backend, .. } => Some(backend),
            BackendError::InvalidConfig { backend, .. } => Some(backend),
            BackendError::Other { backend, .. } => Some(backend),
            _ => None,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Io(err) => write!(f, "I/O error: {}", err),
            BackendError::NotFound { key, backend } => {
                write!(f, "Object not found on {}: {}", backend, key)
            }
            BackendError::PermissionDenied { key, message } => {
                write!(f, "Permission denied for {}: {}", key, message)
            }
            BackendError::AuthenticationFailed { backend, message } => {
                write!(f, "Authentication failed for {}: {}", backend, message)
            }
            BackendError::ConnectionFailed {
                backend,
                endpoint,
                source,
            } => {
                if let Some(src) = source {
                    write!(
                        f,
                        "Connection to {} ({}) failed: {}",
                        backend, endpoint, src
                    )
                } else {
                    write!(f, "Connection to {} ({}) failed", backend, endpoint)
                }
            }
            BackendError::Timeout {
                operation,
                duration_secs,
            } => {
                write!(
                    f,
                    "Operation '{}' timed out after {} seconds",
                    operation, duration_secs
                )
            }
            BackendError::InvalidConfig { backend, message } => {
                write!(f, "Invalid configuration for {}: {}", backend, message)
            }
            BackendError::InvalidKey { key, reason } => {
                write!(f, "Invalid key {}: {}", key, reason)
            }
            BackendError::Network { message, source } => {
                if let Some(src) = source {
                    write!(f, "Network error: {} ({})", message, src)
                } else {
                    write!(f, "Network error: {}", message)
                }
            }
            BackendError::Other { backend, message } => {
                write!(f, "Object store error on {}: {}", backend, message)
            }
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for BackendError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => BackendError::NotFound {
                key: String::new(),
                backend: "unknown".to_string(),
            },
            io::ErrorKind::PermissionDenied => BackendError::PermissionDenied {
                key: String::new(),
                message: err.to_string(),
            },
            _ => BackendError::Io(err),
        }
    }
}
