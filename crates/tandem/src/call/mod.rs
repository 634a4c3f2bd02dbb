//! Call shapes and the per-call state machine.
//!
//! Every call has one of four [`Shape`]s, decided by whether each direction
//! carries a single message or a stream. Regardless of shape, the initiator
//! tracks its view of the call through the same [`CallState`] machine:
//!
//! ```text
//! Opened ──Send──▶ Sending ──HalfClose──▶ HalfClosedLocal ──RemoteClosed──▶ Closed
//!    │                │                                                    ▲
//!    └──RemoteClosed──┴──────────▶ HalfClosedRemote ──HalfClose───────────┘
//! ```
//!
//! A call is `Closed` only once the local send direction is closed *and* the
//! terminal status has been observed.

mod context;

pub use context::CallContext;

use crate::error::{Error, Result};
use core::fmt;
use core::time::Duration;

/// Whether each direction of a call carries one message or a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    /// One request, one response.
    Unary,
    /// One request, zero or more responses.
    ServerStreaming,
    /// Zero or more requests, one response.
    ClientStreaming,
    /// Independent request and response streams.
    BidiStreaming,
}

impl Shape {
    pub const fn from_flags(client_streams: bool, server_streams: bool) -> Self {
        match (client_streams, server_streams) {
            (false, false) => Self::Unary,
            (false, true) => Self::ServerStreaming,
            (true, false) => Self::ClientStreaming,
            (true, true) => Self::BidiStreaming,
        }
    }

    /// Whether the initiator may send more than one request.
    pub const fn client_streams(self) -> bool {
        matches!(self, Self::ClientStreaming | Self::BidiStreaming)
    }

    /// Whether the handler may send more than one response.
    pub const fn server_streams(self) -> bool {
        matches!(self, Self::ServerStreaming | Self::BidiStreaming)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unary => "unary",
            Self::ServerStreaming => "server-streaming",
            Self::ClientStreaming => "client-streaming",
            Self::BidiStreaming => "bidi-streaming",
        })
    }
}

/// The initiator's view of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallState {
    Opened,
    Sending,
    /// Local send direction closed, waiting for the terminal status.
    HalfClosedLocal,
    /// Terminal status observed, local send direction still open.
    HalfClosedRemote,
    Closed,
}

/// Something that happened to a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallEvent {
    /// A request message was written.
    Send,
    /// The local send direction was closed.
    HalfClose,
    /// The terminal status arrived.
    RemoteClosed,
}

impl CallState {
    /// Applies `event`, returning the next state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] when sending after a half-close,
    /// sending after the peer closed, or observing a second terminal status.
    /// Half-closing twice is not an error.
    pub fn on(self, event: CallEvent) -> Result<Self> {
        use CallEvent::*;
        use CallState::*;

        match (self, event) {
            (Opened | Sending, Send) => Ok(Sending),
            (Opened | Sending | HalfClosedLocal, HalfClose) => Ok(HalfClosedLocal),
            (Opened | Sending, RemoteClosed) => Ok(HalfClosedRemote),
            (HalfClosedLocal, RemoteClosed) => Ok(Closed),
            (HalfClosedRemote | Closed, HalfClose) => Ok(Closed),
            (state, event) => Err(Error::InvalidTransition { state, event }),
        }
    }

    pub const fn can_send(self) -> bool {
        matches!(self, Self::Opened | Self::Sending)
    }

    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Per-call settings chosen by the initiator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Maximum duration of the whole call, measured from its creation.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// What a transport needs to know to start a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallHead {
    /// Fully qualified operation name, e.g. `/calculator.CalculatorService/Sum`.
    pub operation: String,
    pub shape: Shape,
    pub timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: &[CallEvent]) -> Result<CallState> {
        events
            .iter()
            .try_fold(CallState::Opened, |state, event| state.on(*event))
    }

    #[test]
    fn streaming_call_closes_after_both_directions() {
        use CallEvent::*;

        assert_eq!(run(&[Send, Send, HalfClose]).unwrap(), CallState::HalfClosedLocal);
        assert_eq!(
            run(&[Send, Send, HalfClose, RemoteClosed]).unwrap(),
            CallState::Closed
        );
        assert_eq!(
            run(&[Send, RemoteClosed, HalfClose]).unwrap(),
            CallState::Closed
        );
        assert_eq!(run(&[HalfClose, RemoteClosed]).unwrap(), CallState::Closed);
    }

    #[test]
    fn half_close_is_idempotent() {
        use CallEvent::*;

        assert_eq!(
            run(&[Send, HalfClose, HalfClose]).unwrap(),
            CallState::HalfClosedLocal
        );
        assert_eq!(
            run(&[HalfClose, RemoteClosed, HalfClose]).unwrap(),
            CallState::Closed
        );
    }

    #[test]
    fn send_after_half_close_is_rejected() {
        use CallEvent::*;

        let err = run(&[Send, HalfClose, Send]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                state: CallState::HalfClosedLocal,
                event: Send
            }
        ));
        assert!(run(&[RemoteClosed, Send]).is_err());
        assert!(run(&[HalfClose, RemoteClosed, Send]).is_err());
    }

    #[test]
    fn second_terminal_status_is_rejected() {
        use CallEvent::*;

        assert!(run(&[RemoteClosed, RemoteClosed]).is_err());
        assert!(run(&[HalfClose, RemoteClosed, RemoteClosed]).is_err());
    }

    #[test]
    fn shape_flags() {
        for shape in [
            Shape::Unary,
            Shape::ServerStreaming,
            Shape::ClientStreaming,
            Shape::BidiStreaming,
        ] {
            assert_eq!(
                Shape::from_flags(shape.client_streams(), shape.server_streams()),
                shape
            );
        }
        assert_eq!(Shape::BidiStreaming.to_string(), "bidi-streaming");
    }
}
