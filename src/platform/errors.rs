// ============================================================================
// File: packages/vm-backup/src/platform/errors.rs
// ----------------------------------------------------------------------------
// Platform client error types
// ============================================================================

/// Errors surfaced by a virtualization platform client
///
/// The variant decides how the orchestrator reacts: connection errors
/// restart the current VM on a fresh session, request errors fail only the
/// current VM, and anything unexpected aborts the run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    /// Transport-level failure or expired session
    #[error("Connection to {endpoint} failed: {details}")]
    Connection { endpoint: String, details: String },

    /// The platform rejected a request
    #[error("Request {operation} rejected with status {status}: {details}")]
    Request {
        operation: &'static str,
        status: u16,
        details: String,
    },

    /// Response or state the client does not know how to interpret
    #[error("Unexpected platform response during {operation}: {details}")]
    Unexpected {
        operation: &'static str,
        details: String,
    },
}

impl PlatformError {
    /// Create a connection error
    pub fn connection<E: Into<String>, D: Into<String>>(endpoint: E, details: D) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            details: details.into(),
        }
    }

    /// Create a request error
    pub fn request<D: Into<String>>(operation: &'static str, status: u16, details: D) -> Self {
        Self::Request {
            operation,
            status,
            details: details.into(),
        }
    }

    /// Create an unexpected-response error
    pub fn unexpected<D: Into<String>>(operation: &'static str, details: D) -> Self {
        Self::Unexpected {
            operation,
            details: details.into(),
        }
    }
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;
