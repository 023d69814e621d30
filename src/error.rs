//! Error handling for the CAD MCP server.
//!
//! One taxonomy covers the whole pipeline: validation failures detected
//! against the entity graph (never reaching the kernel), kernel-classified
//! geometry failures (surfaced verbatim, never retried), and server-surface
//! failures (unknown session, disabled tool). Each variant maps to a JSON-RPC
//! error code and a metrics category.

use crate::model::EntityId;
use serde::Serialize;
use thiserror::Error;

/// JSON-RPC error codes following the 2.0 specification plus custom codes
/// in the -32000 application range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,

    /// Referenced parent entity absent or deleted
    ParentNotFound = -32001,
    /// Referenced entity absent or deleted
    EntityNotFound = -32002,
    /// Entity still has dependent children
    HasDependents = -32003,
    /// Kernel rejected the operation for geometric reasons
    InvalidGeometry = -32004,
    /// Kernel does not support the requested operation
    UnsupportedOperation = -32005,
    /// Kernel backend not available
    KernelUnavailable = -32006,
    /// Kernel call timed out
    Timeout = -32007,
    /// Session not found
    SessionNotFound = -32008,
    /// Tool disabled by configuration
    ToolDisabled = -32009,
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Error category used as the metrics label.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "validation_error",
            ErrorCode::InternalError => "server_error",
            ErrorCode::ParentNotFound
            | ErrorCode::EntityNotFound
            | ErrorCode::SessionNotFound => "resource_not_found",
            ErrorCode::HasDependents => "validation_error",
            ErrorCode::InvalidGeometry => "kernel_error",
            ErrorCode::UnsupportedOperation | ErrorCode::KernelUnavailable => "kernel_unavailable",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ToolDisabled => "not_found",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Error type shared by the entity graph, the kernel adapter, and the
/// operation dispatcher.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CadError {
    #[error("parent entity '{0}' not found")]
    ParentNotFound(EntityId),

    #[error("entity '{0}' not found")]
    EntityNotFound(EntityId),

    #[error("entity '{id}' has {count} dependent entities; remove them first or cascade")]
    HasDependents { id: EntityId, count: usize },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("geometry kernel unavailable: {0}")]
    KernelUnavailable(String),

    #[error("kernel operation timed out: {0}")]
    Timeout(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("tool '{0}' is disabled by server configuration")]
    ToolDisabled(String),
}

impl CadError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        CadError::InvalidParameters(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CadError::ParentNotFound(_) => ErrorCode::ParentNotFound,
            CadError::EntityNotFound(_) => ErrorCode::EntityNotFound,
            CadError::HasDependents { .. } => ErrorCode::HasDependents,
            CadError::InvalidParameters(_) => ErrorCode::InvalidParams,
            CadError::InvalidGeometry(_) => ErrorCode::InvalidGeometry,
            CadError::UnsupportedOperation(_) => ErrorCode::UnsupportedOperation,
            CadError::KernelUnavailable(_) => ErrorCode::KernelUnavailable,
            CadError::Timeout(_) => ErrorCode::Timeout,
            CadError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            CadError::ToolDisabled(_) => ErrorCode::ToolDisabled,
        }
    }

    pub fn category(&self) -> &'static str {
        self.code().category()
    }

    /// Validation errors are detected against local state and guarantee no
    /// kernel call was made and no graph mutation happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CadError::ParentNotFound(_)
                | CadError::EntityNotFound(_)
                | CadError::HasDependents { .. }
                | CadError::InvalidParameters(_)
        )
    }
}

pub type CadResult<T> = Result<T, CadError>;

/// Convert a domain error to the rmcp wire error at the tool boundary.
pub fn to_mcp_error(error: CadError) -> rmcp::ErrorData {
    crate::metrics::METRICS.record_error(error.category());
    let data = serde_json::json!({
        "code": error.code().code(),
        "category": error.category(),
    });

    match error.code() {
        ErrorCode::InvalidParams | ErrorCode::HasDependents => {
            rmcp::ErrorData::invalid_params(error.to_string(), Some(data))
        }
        ErrorCode::ToolDisabled => rmcp::ErrorData::invalid_request(error.to_string(), Some(data)),
        _ => rmcp::ErrorData::internal_error(error.to_string(), Some(data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_values() {
        assert_eq!(ErrorCode::InvalidParams.code(), -32602);
        assert_eq!(ErrorCode::ParentNotFound.code(), -32001);
        assert_eq!(ErrorCode::EntityNotFound.code(), -32002);
        assert_eq!(ErrorCode::HasDependents.code(), -32003);
        assert_eq!(ErrorCode::InvalidGeometry.code(), -32004);
        assert_eq!(ErrorCode::Timeout.code(), -32007);
    }

    #[test]
    fn validation_errors_never_reach_the_kernel() {
        assert!(CadError::ParentNotFound(EntityId::from("plane_1")).is_validation());
        assert!(CadError::EntityNotFound(EntityId::from("sketch_9")).is_validation());
        assert!(CadError::invalid_params("radius must be positive").is_validation());
        assert!(
            CadError::HasDependents {
                id: EntityId::from("plane_1"),
                count: 2
            }
            .is_validation()
        );

        assert!(!CadError::InvalidGeometry("open profile".into()).is_validation());
        assert!(!CadError::KernelUnavailable("null backend".into()).is_validation());
        assert!(!CadError::Timeout("boolean".into()).is_validation());
    }

    #[test]
    fn categories() {
        assert_eq!(
            CadError::EntityNotFound(EntityId::from("feature_3")).category(),
            "resource_not_found"
        );
        assert_eq!(
            CadError::InvalidGeometry("non-adjacent".into()).category(),
            "kernel_error"
        );
        assert_eq!(CadError::Timeout("tessellate".into()).category(), "timeout");
        assert_eq!(
            CadError::invalid_params("bad quality").category(),
            "validation_error"
        );
    }
}
