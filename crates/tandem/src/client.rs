//! Typed call initiator.
//!
//! [`Client`] opens calls of each shape over a [`Transport`]. Every call gets
//! a fresh [`CallContext`] carrying its deadline, and a [`CallHandle`] that
//! tracks the call's [`CallState`] from the initiator's side.
//!
//! Response frames are pumped from the transport by a per-call task. The pump
//! stops (dropping the transport stream, which cancels the call at the peer)
//! as soon as the call is cancelled, its deadline passes, or the caller drops
//! the response half.

use crate::{
    call::{CallContext, CallEvent, CallHead, CallOptions, CallState, Shape},
    error::Error,
    status::CallError,
    stream::{Frames, ResponseTx, decode, encode},
    transport::Transport,
};
use bytes::Bytes;
use core::marker::PhantomData;
use futures::{StreamExt, stream::BoxStream};
use parking_lot::Mutex;
use prost::Message;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_BUFFER: usize = 8;

pub struct Client<T> {
    transport: Arc<T>,
    buffer: usize,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            buffer: self.buffer,
        }
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<T>) -> Self {
        Self {
            transport,
            buffer: DEFAULT_BUFFER,
        }
    }

    /// Sets how many messages each direction buffers.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Sends one request and waits for exactly one response.
    ///
    /// # Errors
    ///
    /// The terminal status of the call, mapped to a [`CallError`]. A response
    /// is never returned together with an error.
    pub async fn unary<Req, Resp>(
        &self,
        operation: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<Resp, CallError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let (mut requests, mut responses) = self.open::<Req, Resp>(operation, Shape::Unary, options);
        if let Err(err) = requests.send(request).await {
            return Err(responses.explain(err).await);
        }
        requests.close();
        responses.single().await
    }

    /// Sends one request and returns the stream of responses.
    pub async fn server_streaming<Req, Resp>(
        &self,
        operation: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<ResponseStream<Resp>, CallError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let (mut requests, mut responses) =
            self.open::<Req, Resp>(operation, Shape::ServerStreaming, options);
        if let Err(err) = requests.send(request).await {
            return Err(responses.explain(err).await);
        }
        requests.close();
        Ok(responses)
    }

    /// Opens a call that takes many requests and answers once.
    pub fn client_streaming<Req, Resp>(
        &self,
        operation: &str,
        options: CallOptions,
    ) -> ClientStreamingCall<Req, Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let (requests, responses) = self.open(operation, Shape::ClientStreaming, options);
        ClientStreamingCall {
            requests,
            responses,
        }
    }

    /// Opens a call with independent request and response streams.
    pub fn bidi_streaming<Req, Resp>(
        &self,
        operation: &str,
        options: CallOptions,
    ) -> BidiCall<Req, Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let (requests, responses) = self.open(operation, Shape::BidiStreaming, options);
        BidiCall {
            requests,
            responses,
        }
    }

    fn open<Req, Resp>(
        &self,
        operation: &str,
        shape: Shape,
        options: CallOptions,
    ) -> (RequestSink<Req>, ResponseStream<Resp>)
    where
        Req: Message,
        Resp: Message + Default,
    {
        let ctx = CallContext::new(operation, shape, options.timeout);
        let handle = CallHandle::new(ctx.clone());

        let (req_tx, req_rx) = mpsc::channel::<Bytes>(self.buffer);
        let (resp_tx, resp_rx) = mpsc::channel(self.buffer);

        let head = CallHead {
            operation: operation.to_owned(),
            shape,
            timeout: options.timeout,
        };
        let fut = pump(
            Arc::clone(&self.transport),
            head,
            ReceiverStream::new(req_rx).boxed(),
            resp_tx,
            ctx,
        );

        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            let span = tracing::debug_span!("initiate", operation = %operation, shape = %shape);
            fut.instrument(span)
        };

        tokio::spawn(fut);

        (
            RequestSink::new(req_tx, handle.clone()),
            ResponseStream::new(ReceiverStream::new(resp_rx).boxed(), handle),
        )
    }
}

/// Starts the call on the transport and forwards its response frames.
async fn pump<T: Transport>(
    transport: Arc<T>,
    head: CallHead,
    requests: BoxStream<'static, Bytes>,
    resp_tx: ResponseTx,
    ctx: CallContext,
) {
    let started = tokio::select! {
        biased;
        _ = ctx.done() => return,
        () = resp_tx.closed() => return,
        started = transport.start(head, requests) => started,
    };

    let mut frames = match started {
        Ok(frames) => frames,
        Err(status) => {
            let _ = resp_tx.send(Err(status)).await;
            return;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.done() => return,
            () = resp_tx.closed() => return,
            next = frames.next() => next,
        };
        let Some(item) = next else {
            return;
        };

        let terminal = item.is_err();
        tokio::select! {
            biased;
            _ = ctx.done() => return,
            res = resp_tx.send(item) => if res.is_err() {
                return;
            },
        }
        if terminal {
            return;
        }
    }
}

/// The initiator's shared view of one call.
#[derive(Clone, Debug)]
pub struct CallHandle {
    ctx: CallContext,
    state: Arc<Mutex<CallState>>,
}

impl CallHandle {
    fn new(ctx: CallContext) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(CallState::Opened)),
        }
    }

    pub fn state(&self) -> CallState {
        *self.state.lock()
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Cancels the call on both sides.
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    fn apply(&self, event: CallEvent) -> Result<CallState, Error> {
        let mut state = self.state.lock();
        let next = state.on(event)?;
        *state = next;
        Ok(next)
    }
}

/// The send direction of a call.
///
/// Dropping the sink half-closes the send direction.
pub struct RequestSink<T> {
    tx: Option<mpsc::Sender<Bytes>>,
    call: CallHandle,
    _marker: PhantomData<fn(T)>,
}

impl<T> RequestSink<T> {
    fn new(tx: mpsc::Sender<Bytes>, call: CallHandle) -> Self {
        Self {
            tx: Some(tx),
            call,
            _marker: PhantomData,
        }
    }

    /// Half-closes the send direction. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            if let Err(_e) = self.call.apply(CallEvent::HalfClose) {
                #[cfg(feature = "tracing")]
                tracing::warn!("Half-close rejected: {}", _e);
            }
        }
    }

    pub fn handle(&self) -> &CallHandle {
        &self.call
    }
}

impl<T: Message> RequestSink<T> {
    /// Sends one request, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// - `failed-precondition` after a half-close.
    /// - The call's terminal reason once it is cancelled or past its deadline.
    /// - `internal` when the peer already ended the call or stopped reading
    ///   requests.
    ///
    /// The call state only moves once the request was handed to the peer.
    pub async fn send(&mut self, message: T) -> Result<(), CallError> {
        self.call.ctx.check()?;

        let Some(tx) = &self.tx else {
            return Err(Error::InvalidTransition {
                state: CallState::HalfClosedLocal,
                event: CallEvent::Send,
            }
            .into());
        };
        match self.call.state() {
            CallState::HalfClosedRemote | CallState::Closed => return Err(peer_closed().into()),
            state => {
                state.on(CallEvent::Send)?;
            }
        }
        let frame = encode(&message);

        let res = tokio::select! {
            biased;
            status = self.call.ctx.done() => return Err(status.into()),
            res = tx.send(frame) => res,
        };
        if res.is_err() {
            return Err(Error::ChannelError {
                context: "Peer stopped reading requests".to_owned(),
            }
            .into());
        }
        // The peer may have ended the call while the frame was queued.
        self.call.apply(CallEvent::Send).map_err(|_| peer_closed())?;
        Ok(())
    }
}

fn peer_closed() -> Error {
    Error::ChannelError {
        context: "Peer already closed the call".to_owned(),
    }
}

impl<T> Drop for RequestSink<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// The receive direction of a call.
pub struct ResponseStream<T> {
    frames: Frames,
    call: CallHandle,
    peeked: Option<T>,
    done: bool,
}

impl<T: Message + Default> ResponseStream<T> {
    fn new(frames: Frames, call: CallHandle) -> Self {
        Self {
            frames,
            call,
            peeked: None,
            done: false,
        }
    }

    /// Receives the next response.
    ///
    /// Returns `Ok(None)` once the call ended with an ok status. A non-ok
    /// terminal status is returned as an error exactly once, after which the
    /// stream keeps returning `Ok(None)`. Responses received before an error
    /// remain valid.
    pub async fn message(&mut self) -> Result<Option<T>, CallError> {
        if let Some(message) = self.peeked.take() {
            return Ok(Some(message));
        }
        if self.done {
            return Ok(None);
        }

        let next = tokio::select! {
            biased;
            status = self.call.ctx.done() => Err(status),
            next = self.frames.next() => Ok(next),
        };

        let status = match next {
            Ok(Some(Ok(frame))) => match decode::<T>(frame) {
                Ok(message) => return Ok(Some(message)),
                Err(status) => status,
            },
            Ok(Some(Err(status))) | Err(status) => status,
            Ok(None) => {
                self.finish();
                return Ok(None);
            }
        };

        self.finish();
        // Stops the pump and fails any pending send with the same reason.
        self.call.ctx.abort(status.clone());
        Err(status.into())
    }

    /// Receives exactly one response followed by an ok status.
    pub async fn single(mut self) -> Result<T, CallError> {
        let Some(message) = self.message().await? else {
            return Err(CallError::Internal(
                "Call ended without a response".to_owned(),
            ));
        };
        if self.message().await?.is_some() {
            return Err(CallError::Internal(
                "Call returned more than one response".to_owned(),
            ));
        }
        Ok(message)
    }

    /// Reads every remaining response.
    pub async fn collect(mut self) -> Result<Vec<T>, CallError> {
        let mut messages = Vec::new();
        while let Some(message) = self.message().await? {
            messages.push(message);
        }
        Ok(messages)
    }

    pub fn handle(&self) -> &CallHandle {
        &self.call
    }

    /// Prefers the peer's terminal status over a local send failure.
    async fn explain(&mut self, err: CallError) -> CallError {
        if !matches!(err, CallError::Internal(_)) {
            return err;
        }
        match self.message().await {
            Err(terminal) => terminal,
            Ok(Some(message)) => {
                self.peeked = Some(message);
                err
            }
            Ok(None) => err,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        if let Err(_e) = self.call.apply(CallEvent::RemoteClosed) {
            #[cfg(feature = "tracing")]
            tracing::warn!("Terminal status rejected: {}", _e);
        }
    }
}

/// A call that takes many requests and answers once.
pub struct ClientStreamingCall<Req, Resp> {
    requests: RequestSink<Req>,
    responses: ResponseStream<Resp>,
}

impl<Req: Message, Resp: Message + Default> ClientStreamingCall<Req, Resp> {
    pub async fn send(&mut self, message: Req) -> Result<(), CallError> {
        match self.requests.send(message).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.responses.explain(err).await),
        }
    }

    /// Half-closes and waits for the aggregate response.
    pub async fn close_and_recv(mut self) -> Result<Resp, CallError> {
        self.requests.close();
        self.responses.single().await
    }

    pub fn handle(&self) -> &CallHandle {
        self.requests.handle()
    }

    pub fn state(&self) -> CallState {
        self.handle().state()
    }

    pub fn cancel(&self) {
        self.handle().cancel();
    }
}

/// A call with independent request and response streams.
///
/// Use [`split`](Self::split) to drive both directions from different tasks,
/// or [`multiplex`](crate::multiplex::multiplex) to have them driven for you.
pub struct BidiCall<Req, Resp> {
    requests: RequestSink<Req>,
    responses: ResponseStream<Resp>,
}

impl<Req: Message, Resp: Message + Default> BidiCall<Req, Resp> {
    pub async fn send(&mut self, message: Req) -> Result<(), CallError> {
        self.requests.send(message).await
    }

    pub fn close_send(&mut self) {
        self.requests.close();
    }

    pub async fn message(&mut self) -> Result<Option<Resp>, CallError> {
        self.responses.message().await
    }

    pub fn split(self) -> (RequestSink<Req>, ResponseStream<Resp>) {
        (self.requests, self.responses)
    }

    pub fn handle(&self) -> &CallHandle {
        self.requests.handle()
    }

    pub fn state(&self) -> CallState {
        self.handle().state()
    }

    pub fn cancel(&self) {
        self.handle().cancel();
    }
}
