//! Error types for the calling-convention core.
//!
//! This module defines the central `Error` enum, which captures the failures
//! raised by the core itself (as opposed to the statuses a handler chooses to
//! return). It implements `From<Error>` for `tonic::Status` so every failure
//! can terminate a call with an appropriate status code and message.
//!
//! ## Error Cases
//! - `ChannelError`: An internal communication failure between the tasks of a
//!   call.
//! - `UnknownOperation`: No handler is registered under the requested name.
//! - `ShapeMismatch`: The handler exists but was registered with a different
//!   call shape.
//! - `DuplicateOperation`: An operation name was registered twice.
//! - `InvalidTransition`: A call event is not legal in the current call state.
//! - `Decode`: A message frame could not be decoded.
//! - `RequestCancelled`: The peer went away mid-call.
//! - `InvalidRequest`: A request violated the calling convention.
//! - `ServiceShutdown`: A call arrived while the dispatcher was shutting down.

use crate::call::{CallEvent, CallState, Shape};
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the calling-convention core.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// No handler is registered under this operation name.
    #[error("Unknown operation: {operation}")]
    UnknownOperation { operation: String },

    /// The handler was registered with a different call shape.
    #[error("Operation {operation} is {registered}, not {requested}")]
    ShapeMismatch {
        operation: String,
        registered: Shape,
        requested: Shape,
    },

    /// The same operation name was registered more than once.
    #[error("Operation {operation} is registered more than once")]
    DuplicateOperation { operation: String },

    /// The event is not legal in the current call state.
    #[error("Cannot apply {event:?} to a call in state {state:?}")]
    InvalidTransition { state: CallState, event: CallEvent },

    /// A frame did not decode into the expected message type.
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The peer aborted the call.
    #[error("Request cancelled by peer")]
    RequestCancelled,

    /// The request violated the calling convention of its operation.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The dispatcher is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            e @ (Error::UnknownOperation { .. } | Error::ShapeMismatch { .. }) => {
                Status::unimplemented(e.to_string())
            }
            e @ Error::DuplicateOperation { .. } => Status::already_exists(e.to_string()),
            e @ Error::InvalidTransition { .. } => Status::failed_precondition(e.to_string()),
            Error::Decode(e) => Status::internal(format!("Failed to decode message: {}", e)),
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
