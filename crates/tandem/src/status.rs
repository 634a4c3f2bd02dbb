//! Mapping between terminal call statuses and typed caller-side errors.
//!
//! Handlers terminate a call with a [`Status`]. The initiator never sees a raw
//! status: every non-ok terminal status is converted into a [`CallError`],
//! which names the handful of codes the calling convention cares about and
//! carries everything else as [`CallError::Failed`].

use crate::error::Error;
use core::any::Any;
use tonic::{Code, Status};

/// A non-ok call outcome as observed by the initiator.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The request was rejected by validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The addressed entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The handler failed, panicked, or the core hit an internal fault.
    #[error("internal: {0}")]
    Internal(String),

    /// Either side cancelled the call.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The call outlived its deadline.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Any other status, including transport-level failures.
    #[error("{code}: {message}")]
    Failed { code: Code, message: String },
}

impl CallError {
    /// The status code this error was built from.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::NotFound(_) => Code::NotFound,
            Self::Internal(_) => Code::Internal,
            Self::Cancelled(_) => Code::Cancelled,
            Self::DeadlineExceeded(_) => Code::DeadlineExceeded,
            Self::Failed { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(message)
            | Self::NotFound(message)
            | Self::Internal(message)
            | Self::Cancelled(message)
            | Self::DeadlineExceeded(message)
            | Self::Failed { message, .. } => message,
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            Code::DeadlineExceeded | Code::Unavailable | Code::ResourceExhausted
        )
    }

    /// Whether the caller is at fault and must change the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.code(),
            Code::InvalidArgument
                | Code::NotFound
                | Code::AlreadyExists
                | Code::FailedPrecondition
                | Code::OutOfRange
                | Code::Unimplemented
        )
    }
}

impl From<Status> for CallError {
    fn from(status: Status) -> Self {
        let message = status.message().to_owned();
        match status.code() {
            Code::InvalidArgument => Self::InvalidArgument(message),
            Code::NotFound => Self::NotFound(message),
            Code::Internal => Self::Internal(message),
            Code::Cancelled => Self::Cancelled(message),
            Code::DeadlineExceeded => Self::DeadlineExceeded(message),
            code => Self::Failed { code, message },
        }
    }
}

impl From<CallError> for Status {
    fn from(err: CallError) -> Self {
        Status::new(err.code(), err.message())
    }
}

impl From<Error> for CallError {
    fn from(err: Error) -> Self {
        Status::from(err).into()
    }
}

/// Converts a caught handler panic into an `internal` status.
pub(crate) fn panic_status(payload: Box<dyn Any + Send>) -> Status {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_owned());
    Status::internal(format!("Handler panicked: {detail}"))
}
