use super::Shape;
use core::time::Duration;
use std::sync::{Arc, OnceLock};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tonic::Status;

const CANCELLED_MESSAGE: &str = "Call was cancelled";
const DEADLINE_MESSAGE: &str = "Deadline exceeded";

/// Shared per-call state: identity, deadline and cancellation.
///
/// Both halves of a call (and any task a handler spawns for it) hold clones of
/// the same context. The first party to end the call records the terminal
/// reason, every later observer sees that same reason.
#[derive(Clone, Debug)]
pub struct CallContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    operation: String,
    shape: Shape,
    started: Instant,
    deadline: Option<Instant>,
    token: CancellationToken,
    reason: OnceLock<Status>,
}

impl CallContext {
    pub fn new(operation: impl Into<String>, shape: Shape, timeout: Option<Duration>) -> Self {
        Self::with_token(operation, shape, timeout, CancellationToken::new())
    }

    /// Creates a context cancelled together with `token`.
    ///
    /// Used by the dispatcher to hang every call off its shutdown token.
    pub fn with_token(
        operation: impl Into<String>,
        shape: Shape,
        timeout: Option<Duration>,
        token: CancellationToken,
    ) -> Self {
        let started = Instant::now();
        Self {
            inner: Arc::new(Inner {
                operation: operation.into(),
                shape,
                started,
                deadline: timeout.map(|t| started + t),
                token,
                reason: OnceLock::new(),
            }),
        }
    }

    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    pub fn shape(&self) -> Shape {
        self.inner.shape
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline, `None` if the call has no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Cancels the call with a `cancelled` status.
    pub fn cancel(&self) {
        self.abort(Status::cancelled(CANCELLED_MESSAGE));
    }

    /// Ends the call with `status`, unless a terminal reason was already
    /// recorded.
    pub fn abort(&self, status: Status) {
        let _ = self.inner.reason.set(status);
        self.inner.token.cancel();
    }

    /// Whether the call was cancelled or ran past its deadline.
    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Returns the terminal reason if the call is already over.
    pub fn check(&self) -> Result<(), Status> {
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                self.abort(Status::deadline_exceeded(DEADLINE_MESSAGE));
            }
        }
        if self.inner.token.is_cancelled() {
            return Err(self.reason());
        }
        Ok(())
    }

    /// Resolves once the call is cancelled or its deadline passes, yielding
    /// the terminal reason.
    pub async fn done(&self) -> Status {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.inner.token.cancelled() => {}
                    () = sleep_until(deadline) => {
                        self.abort(Status::deadline_exceeded(DEADLINE_MESSAGE));
                    }
                }
            }
            None => self.inner.token.cancelled().await,
        }
        self.reason()
    }

    fn reason(&self) -> Status {
        self.inner
            .reason
            .get()
            .cloned()
            .unwrap_or_else(|| Status::cancelled(CANCELLED_MESSAGE))
    }
}
