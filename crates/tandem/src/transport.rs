//! The boundary between the initiator and whatever carries its frames.

use crate::{call::CallHead, dispatch::Dispatcher, stream::Frames};
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::sync::Arc;
use tonic::Status;

/// Starts calls on behalf of a [`Client`](crate::client::Client).
///
/// A transport must deliver request frames in order, signal the end of
/// `requests` as a half-close, and yield the response frames in order,
/// terminated either by the end of the stream (ok) or by one `Err(Status)`.
/// Dropping the returned stream must cancel the call at the peer.
#[tonic::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn start(
        &self,
        head: CallHead,
        requests: BoxStream<'static, Bytes>,
    ) -> Result<Frames, Status>;
}

/// In-process transport straight into a [`Dispatcher`].
#[derive(Clone)]
pub struct LocalTransport {
    dispatcher: Arc<Dispatcher>,
}

impl LocalTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

#[tonic::async_trait]
impl Transport for LocalTransport {
    async fn start(
        &self,
        head: CallHead,
        requests: BoxStream<'static, Bytes>,
    ) -> Result<Frames, Status> {
        self.dispatcher.dispatch(
            &head.operation,
            Some(head.shape),
            head.timeout,
            requests.map(Ok).boxed(),
        )
    }
}
