//! Server-side call runner.
//!
//! The [`Dispatcher`] owns the immutable [`Registry`] and runs one task per
//! call. Each task races the handler against the call's deadline, its
//! cancellation, and the initiator dropping the response stream, then
//! terminates the response direction exactly once: by ending it (ok) or by
//! sending a single `Err(Status)` item.
//!
//! Shutdown is graceful and bounded:
//!
//! 1. stop accepting new calls (they fail with `unavailable`),
//! 2. wait up to [`DispatchConfig::drain_timeout`] for in-flight calls,
//! 3. cancel whatever is still running.

use crate::{
    call::{CallContext, Shape},
    error::Error,
    handler::{BoxedHandler, Registry},
    status::panic_status,
    stream::{Frames, ResponseTx},
};
use core::{panic::AssertUnwindSafe, time::Duration};
use futures::{FutureExt, StreamExt};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tuning knobs of a [`Dispatcher`].
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Responses buffered per call before the handler waits for the reader.
    pub response_buffer: usize,
    /// How long shutdown waits for in-flight calls before cancelling them.
    pub drain_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            response_buffer: 8,
            drain_timeout: Duration::from_secs(3),
        }
    }
}

/// Lifecycle notifications for every dispatched call.
pub trait CallObserver: Send + Sync + 'static {
    fn call_started(&self, _operation: &str, _shape: Shape) {}

    fn call_finished(&self, _operation: &str, _shape: Shape, _code: Code, _elapsed: Duration) {}
}

pub struct Dispatcher {
    registry: Registry,
    config: DispatchConfig,
    shutdown_token: CancellationToken,
    accepting: AtomicBool,
    inflight: Arc<AtomicUsize>,
    observer: Option<Arc<dyn CallObserver>>,
}

impl Dispatcher {
    pub fn new(registry: Registry, config: DispatchConfig) -> Self {
        Self {
            registry,
            config,
            shutdown_token: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            inflight: Arc::new(AtomicUsize::new(0)),
            observer: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn shape_of(&self, operation: &str) -> Option<Shape> {
        self.registry.shape_of(operation)
    }

    /// Number of calls whose handler task is still running.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Starts a call and returns its response frames.
    ///
    /// The handler runs on its own task; the returned stream yields its
    /// responses in order and ends with at most one `Err(Status)` item.
    /// Dropping the stream cancels the call.
    ///
    /// # Errors
    ///
    /// - `unavailable` while shutting down.
    /// - `unimplemented` for an unknown operation, or when `expected` does not
    ///   match the registered shape.
    pub fn dispatch(
        &self,
        operation: &str,
        expected: Option<Shape>,
        timeout: Option<Duration>,
        requests: Frames,
    ) -> Result<Frames, Status> {
        if !self.is_accepting() {
            return Err(Error::ServiceShutdown.into());
        }

        let registration = self
            .registry
            .get(operation)
            .ok_or_else(|| Error::UnknownOperation {
                operation: operation.to_owned(),
            })?;

        let shape = registration.shape();
        if let Some(requested) = expected {
            if requested != shape {
                return Err(Error::ShapeMismatch {
                    operation: operation.to_owned(),
                    registered: shape,
                    requested,
                }
                .into());
            }
        }

        let ctx = CallContext::with_token(
            operation,
            shape,
            timeout,
            self.shutdown_token.child_token(),
        );
        let (tx, rx) = mpsc::channel(self.config.response_buffer.max(1));

        let guard = InflightGuard::new(&self.inflight);
        if let Some(observer) = &self.observer {
            observer.call_started(operation, shape);
        }

        let fut = run_call(
            Arc::clone(registration.handler()),
            ctx,
            requests,
            tx,
            guard,
            self.observer.clone(),
        );

        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            let span = tracing::info_span!("call", operation = %operation, shape = %shape);
            fut.instrument(span)
        };

        tokio::spawn(fut);

        Ok(ReceiverStream::new(rx).boxed())
    }

    /// Gracefully shuts down, returning how many calls had to be cancelled.
    pub async fn shutdown(&self) -> usize {
        // === Phase 0: Stop accepting new calls ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new calls");
        self.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for in-flight calls to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!("Draining in-flight calls ({} active)", self.inflight());
        let drained = self.wait_idle(self.config.drain_timeout).await;

        let cancelled = if drained {
            #[cfg(feature = "tracing")]
            tracing::debug!("All in-flight calls drained successfully");
            0
        } else {
            let remaining = self.inflight();
            #[cfg(feature = "tracing")]
            tracing::warn!("Graceful drain timed out ({} calls still active)", remaining);
            remaining
        };

        // === Phase 2: Cancel any remaining work ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining calls via shutdown token");
        self.shutdown_token.cancel();

        // === Phase 3: Let cancelled calls deliver their terminal status ===
        if !self.wait_idle(DRAIN_POLL_INTERVAL * 10).await {
            #[cfg(feature = "tracing")]
            tracing::warn!("{} calls ignored cancellation", self.inflight());
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatcher shutdown complete");

        cancelled
    }

    async fn wait_idle(&self, limit: Duration) -> bool {
        timeout(limit, async {
            while self.inflight() > 0 {
                sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok()
    }
}

async fn run_call(
    handler: BoxedHandler,
    ctx: CallContext,
    requests: Frames,
    tx: ResponseTx,
    guard: InflightGuard,
    observer: Option<Arc<dyn CallObserver>>,
) {
    let terminal = tx.clone();
    let work = {
        let ctx = ctx.clone();
        AssertUnwindSafe(async move { handler(ctx, requests, tx).await }).catch_unwind()
    };

    let outcome: Result<(), Status> = tokio::select! {
        biased;
        status = ctx.done() => Err(status),
        () = terminal.closed() => {
            ctx.abort(Error::RequestCancelled.into());
            Err(Error::RequestCancelled.into())
        }
        res = work => match res {
            Ok(res) => res,
            Err(panic) => Err(panic_status(panic)),
        },
    };

    let code = match &outcome {
        Ok(()) => Code::Ok,
        Err(status) => status.code(),
    };

    if let Err(status) = outcome {
        #[cfg(feature = "tracing")]
        tracing::debug!("Call ended with {:?}: {}", status.code(), status.message());
        // Wake anything the handler spawned on this call.
        ctx.abort(status.clone());
        if let Err(_e) = terminal.send(Err(status)).await {
            #[cfg(feature = "tracing")]
            tracing::trace!("Initiator gone before terminal status: {_e}");
        }
    }

    if let Some(observer) = observer {
        observer.call_finished(ctx.operation(), ctx.shape(), code, ctx.elapsed());
    }

    // The response stream ends only once the call no longer counts as in flight.
    drop(guard);
    drop(terminal);
}

struct InflightGuard(Arc<AtomicUsize>);

impl InflightGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
