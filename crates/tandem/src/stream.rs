//! Typed message streams on the handler side of a call.
//!
//! Across the transport boundary a call carries opaque [`Bytes`] frames. A
//! direction ends either cleanly (the frame stream is exhausted) or with a
//! terminal [`Status`] item. [`Streaming`] decodes inbound frames for a
//! handler, and [`ResponseSink`] encodes the handler's outbound messages.
//! Both fail fast with the call's terminal reason once the call is cancelled
//! or its deadline passes.

use crate::{call::CallContext, error::Error};
use bytes::Bytes;
use core::marker::PhantomData;
use futures::{StreamExt, stream::BoxStream};
use prost::Message;
use tokio::sync::mpsc;
use tonic::Status;

/// One direction of a call as seen by a transport.
pub type Frames = BoxStream<'static, Result<Bytes, Status>>;

/// Outbound half of a response [`Frames`] channel.
pub type ResponseTx = mpsc::Sender<Result<Bytes, Status>>;

pub fn encode<T: Message>(message: &T) -> Bytes {
    Bytes::from(message.encode_to_vec())
}

/// Decodes one frame, failing with an `internal` status.
pub fn decode<T: Message + Default>(frame: Bytes) -> Result<T, Status> {
    T::decode(frame).map_err(|e| Error::from(e).into())
}

/// Inbound requests of a call.
pub struct Streaming<T> {
    frames: Frames,
    ctx: CallContext,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Message + Default> Streaming<T> {
    pub fn new(frames: Frames, ctx: CallContext) -> Self {
        Self {
            frames,
            ctx,
            finished: false,
            _marker: PhantomData,
        }
    }

    /// Receives the next request.
    ///
    /// Returns `Ok(None)` once the initiator half-closed. After `None` or an
    /// error, every later call returns `Ok(None)`.
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        if self.finished {
            return Ok(None);
        }

        let next = tokio::select! {
            biased;
            status = self.ctx.done() => Err(status),
            next = self.frames.next() => Ok(next),
        };

        let result = match next {
            Ok(Some(Ok(frame))) => decode(frame).map(Some),
            Ok(Some(Err(status))) | Err(status) => Err(status),
            Ok(None) => Ok(None),
        };
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    /// Receives exactly one request and the end of input.
    pub async fn single(mut self) -> Result<T, Status> {
        let Some(message) = self.message().await? else {
            return Err(Error::InvalidRequest {
                reason: "Expected a request message, got end of stream".to_owned(),
            }
            .into());
        };
        if self.message().await?.is_some() {
            return Err(Error::InvalidRequest {
                reason: "Expected a single request message".to_owned(),
            }
            .into());
        }
        Ok(message)
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }
}

/// Outbound responses of a call.
pub struct ResponseSink<T> {
    tx: ResponseTx,
    ctx: CallContext,
    sent: usize,
    _marker: PhantomData<fn(T)>,
}

impl<T: Message> ResponseSink<T> {
    pub fn new(tx: ResponseTx, ctx: CallContext) -> Self {
        Self {
            tx,
            ctx,
            sent: 0,
            _marker: PhantomData,
        }
    }

    /// Sends one response, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Fails with the call's terminal reason if the call is cancelled or past
    /// its deadline, or with `cancelled` if the initiator went away.
    pub async fn send(&mut self, message: T) -> Result<(), Status> {
        self.ctx.check()?;
        let frame = encode(&message);

        let res = tokio::select! {
            biased;
            status = self.ctx.done() => return Err(status),
            res = self.tx.send(Ok(frame)) => res,
        };

        match res {
            Ok(()) => {
                self.sent += 1;
                Ok(())
            }
            Err(_) => Err(Error::RequestCancelled.into()),
        }
    }

    /// Whether the initiator stopped reading.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of responses sent so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }
}
