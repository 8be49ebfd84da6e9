//! RPC failure classification and HTTP mapping.

use gateway_resilience::BreakerError;
use http::StatusCode;
use tonic::{Code, Status};

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Fail-fast: the breaker refused the call before it left the process.
    #[error("downstream '{0}' circuit is open")]
    CircuitOpen(String),

    /// Half-open probe budget exhausted.
    #[error("downstream '{0}' is saturated")]
    Saturated(String),

    /// The client went away; retries were abandoned.
    #[error("call cancelled by the client")]
    Cancelled,

    #[error(transparent)]
    Status(#[from] Status),
}

impl From<BreakerError<RpcError>> for RpcError {
    fn from(err: BreakerError<RpcError>) -> Self {
        match err {
            BreakerError::Open { name } => Self::CircuitOpen(name.to_string()),
            BreakerError::TooManyRequests { name } => Self::Saturated(name.to_string()),
            BreakerError::Inner(inner) => inner,
        }
    }
}

impl RpcError {
    /// Whether a retry could change the outcome.
    #[must_use]
    pub fn is_retryable(status: &Status) -> bool {
        matches!(
            status.code(),
            Code::Unavailable | Code::ResourceExhausted | Code::Aborted
        )
    }

    /// HTTP status the gateway boundary maps this failure to.
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::CircuitOpen(_) | Self::Saturated(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Cancelled => StatusCode::BAD_REQUEST,
            Self::Status(status) => match status.code() {
                Code::NotFound => StatusCode::NOT_FOUND,
                Code::InvalidArgument | Code::OutOfRange => StatusCode::BAD_REQUEST,
                Code::FailedPrecondition | Code::Aborted | Code::AlreadyExists => {
                    StatusCode::CONFLICT
                }
                Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
                Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                Code::Unauthenticated => StatusCode::UNAUTHORIZED,
                Code::PermissionDenied => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}
