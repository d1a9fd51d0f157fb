//! Error types and adapter-specific mapping.
//!
//! Basalt defines one error enum for the library. Protocol translators map it
//! onto their own reply vocabulary through [`AdapterErrorMapping`]; the
//! strings produced by those mappings are part of the client contract.

use thiserror::Error;

/// Common Basalt error conditions.
#[derive(Debug, Error)]
pub enum BasaltError {
    /// Command bytes failed to decode, or target/value counts do not fit the kind.
    #[error("malformed command: {message}")]
    MalformedCommand { message: String },

    /// Kind tag is unknown, or a kind was routed to the wrong entry point
    /// (a read kind sent to apply, a write kind sent to query).
    #[error("unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    /// The consensus deadline elapsed before the command committed or the
    /// read was served.
    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The contacted replica cannot accept proposals.
    #[error("replica {replica} is not the leader (leader is {leader})")]
    NotLeader { replica: u64, leader: u64 },

    /// No majority of replicas is reachable.
    #[error("cluster unavailable: {online} of {total} replicas online")]
    ClusterUnavailable { online: usize, total: usize },

    /// A snapshot stream could not be decoded; prior state is untouched.
    #[error("snapshot decode failed: {message}")]
    SnapshotDecode { message: String },

    /// A client-supplied field could not be parsed by a translator.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// A remote server answered with an error reply.
    #[error("remote error: {message}")]
    Remote { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl BasaltError {
    /// Create a MalformedCommand error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedCommand {
            message: message.into(),
        }
    }

    /// Create an UnsupportedOperation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Create an InvalidData error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a SnapshotDecode error.
    pub fn snapshot_decode(message: impl Into<String>) -> Self {
        Self::SnapshotDecode {
            message: message.into(),
        }
    }

    /// Check if this error indicates the operation may succeed when retried.
    ///
    /// Every write kind is idempotent, so retrying a timed-out proposal is safe.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::NotLeader { .. } | Self::ClusterUnavailable { .. }
        )
    }

    /// Check if this error originated in the consensus substrate rather than
    /// in the request itself.
    pub fn is_gateway_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::NotLeader { .. }
                | Self::ClusterUnavailable { .. }
                | Self::SnapshotDecode { .. }
                | Self::Internal { .. }
        )
    }

    /// Check if this error was caused by the request content.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedCommand { .. }
                | Self::UnsupportedOperation { .. }
                | Self::InvalidData { .. }
        )
    }
}

/// Result type using BasaltError.
pub type BasaltResult<T> = Result<T, BasaltError>;

// ============================================================================
// Adapter-specific error mapping
// ============================================================================

/// Reply for a successful write over HTTP.
pub const HTTP_SUCCESS: &str = "SUCCESS";
/// Reply when the consensus gateway could not complete the request.
pub const OPERATION_ERROR: &str = "OPERATION ERROR";
/// Reply when the request content could not be parsed or validated.
pub const INVALID_DATA: &str = "INVALID DATA";
/// RPC reply when the requested method is not served.
pub const UNKNOWN_METHOD: &str = "UNKNOWN METHOD";

/// Trait for mapping BasaltError to adapter-specific error representations.
pub trait AdapterErrorMapping {
    /// The adapter-specific error type.
    type Error;

    /// Map a BasaltError to the adapter-specific error type.
    fn map_error(error: &BasaltError) -> Self::Error;
}

/// HTTP body vocabulary mapping.
pub struct HttpErrorMapping;

impl AdapterErrorMapping for HttpErrorMapping {
    type Error = &'static str;

    fn map_error(error: &BasaltError) -> &'static str {
        if error.is_request_error() {
            INVALID_DATA
        } else {
            OPERATION_ERROR
        }
    }
}

/// Binary RPC error-frame mapping.
pub struct RpcErrorMapping;

impl AdapterErrorMapping for RpcErrorMapping {
    type Error = String;

    fn map_error(error: &BasaltError) -> String {
        match error {
            BasaltError::UnsupportedOperation { .. } => UNKNOWN_METHOD.to_string(),
            e if e.is_request_error() => format!("{}: {}", INVALID_DATA, e),
            e => format!("{}: {}", OPERATION_ERROR, e),
        }
    }
}
