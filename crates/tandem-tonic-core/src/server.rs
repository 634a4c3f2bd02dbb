//! Tower service that routes gRPC calls into a [`Dispatcher`].
//!
//! [`RpcServer`] plays the role a generated `FooServer<T>` plays in a tonic
//! application: it is mounted on a `tonic::transport::Server` under the gRPC
//! service name `N::NAME` and answers every path below it. The handler shape is
//! whatever the dispatcher's registry says; tonic's streaming entry point
//! carries all four shapes, since a unary call is just a stream of one frame
//! in each direction.

use crate::{codec::BytesCodec, timeout::parse_grpc_timeout};
use bytes::Bytes;
use core::{convert::Infallible, marker::PhantomData, time::Duration};
use futures::StreamExt;
use std::sync::Arc;
use tandem::{Dispatcher, Frames};
use tonic::{
    Request, Response, Status, Streaming,
    codec::{CompressionEncoding, EnabledCompressionEncodings},
    codegen::{Body, BoxFuture, Context, Poll, Service, StdError, http},
    server::{Grpc, NamedService, StreamingService},
};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// A gRPC service name, e.g. `calculator.CalculatorService`.
pub trait ServiceName: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Serves the operations registered under `/{N::NAME}/` in a [`Dispatcher`].
pub struct RpcServer<N> {
    dispatcher: Arc<Dispatcher>,
    accept_compression_encodings: EnabledCompressionEncodings,
    send_compression_encodings: EnabledCompressionEncodings,
    _service: PhantomData<fn() -> N>,
}

impl<N: ServiceName> RpcServer<N> {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            accept_compression_encodings: EnabledCompressionEncodings::default(),
            send_compression_encodings: EnabledCompressionEncodings::default(),
            _service: PhantomData,
        }
    }

    /// Enable decompressing requests with the given encoding.
    #[must_use]
    pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.accept_compression_encodings.enable(encoding);
        self
    }

    /// Compress responses with the given encoding, if the client supports it.
    #[must_use]
    pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.send_compression_encodings.enable(encoding);
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn routes(&self, path: &str) -> bool {
        let ours = path
            .strip_prefix('/')
            .and_then(|rest| rest.split_once('/'))
            .is_some_and(|(service, _)| service == N::NAME);
        ours && self.dispatcher.shape_of(path).is_some()
    }
}

impl<N> Clone for RpcServer<N> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            accept_compression_encodings: self.accept_compression_encodings,
            send_compression_encodings: self.send_compression_encodings,
            _service: PhantomData,
        }
    }
}

impl<N: ServiceName> NamedService for RpcServer<N> {
    const NAME: &'static str = N::NAME;
}

impl<N, B> Service<http::Request<B>> for RpcServer<N>
where
    N: ServiceName,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let path = req.uri().path().to_owned();
        if !self.routes(&path) {
            return Box::pin(async move {
                Ok(Status::unimplemented(format!("Unknown operation: {path}")).into_http())
            });
        }

        let method = DispatchSvc {
            dispatcher: Arc::clone(&self.dispatcher),
            timeout: request_timeout(req.headers()),
            operation: path,
        };
        let accept_compression_encodings = self.accept_compression_encodings;
        let send_compression_encodings = self.send_compression_encodings;

        Box::pin(async move {
            let mut grpc = Grpc::new(BytesCodec).apply_compression_config(
                accept_compression_encodings,
                send_compression_encodings,
            );
            Ok(grpc.streaming(method, req).await)
        })
    }
}

/// An unparsable timeout is ignored, as tonic's own timeout layer does.
fn request_timeout(headers: &http::HeaderMap) -> Option<Duration> {
    let value = headers.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    match parse_grpc_timeout(value) {
        Ok(timeout) => Some(timeout),
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("Ignoring grpc-timeout {:?}: {}", value, _e);
            None
        }
    }
}

struct DispatchSvc {
    dispatcher: Arc<Dispatcher>,
    operation: String,
    timeout: Option<Duration>,
}

impl StreamingService<Bytes> for DispatchSvc {
    type Response = Bytes;
    type ResponseStream = Frames;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<Bytes>>) -> Self::Future {
        let dispatcher = Arc::clone(&self.dispatcher);
        let operation = self.operation.clone();
        let timeout = self.timeout;
        Box::pin(async move {
            let requests = request.into_inner().boxed();
            let frames = dispatcher.dispatch(&operation, None, timeout, requests)?;
            Ok(Response::new(frames))
        })
    }
}
