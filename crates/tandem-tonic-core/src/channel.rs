//! Client-side [`Transport`] over a tonic [`Channel`].

use crate::codec::BytesCodec;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use tandem::{CallHead, Frames, Transport};
use tonic::{
    Request, Status,
    client::Grpc,
    codec::CompressionEncoding,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
};

/// Starts `tandem` calls as gRPC streaming calls on a shared channel.
///
/// The channel multiplexes every call over its HTTP/2 connection; cloning a
/// `TonicTransport` is cheap and shares the connection.
#[derive(Clone, Debug)]
pub struct TonicTransport {
    channel: Channel,
    compression: Option<CompressionEncoding>,
}

impl TonicTransport {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            compression: None,
        }
    }

    /// Connects eagerly to `endpoint`.
    pub async fn connect(endpoint: Endpoint) -> Result<Self, tonic::transport::Error> {
        Ok(Self::new(endpoint.connect().await?))
    }

    /// Compress requests with `encoding` and accept responses compressed with
    /// it.
    #[must_use]
    pub fn with_compression(mut self, encoding: CompressionEncoding) -> Self {
        self.compression = Some(encoding);
        self
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

#[tonic::async_trait]
impl Transport for TonicTransport {
    async fn start(
        &self,
        head: CallHead,
        requests: BoxStream<'static, Bytes>,
    ) -> Result<Frames, Status> {
        let path = PathAndQuery::try_from(head.operation.as_str()).map_err(|e| {
            Status::internal(format!("Invalid operation path {:?}: {e}", head.operation))
        })?;

        let mut grpc = Grpc::new(self.channel.clone());
        if let Some(encoding) = self.compression {
            grpc = grpc.send_compressed(encoding).accept_compressed(encoding);
        }
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("Service was not ready: {e}")))?;

        let mut request = Request::new(requests);
        if let Some(timeout) = head.timeout {
            request.set_timeout(timeout);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Starting {} call {}", head.shape, head.operation);

        let response = grpc.streaming(request, path, BytesCodec).await?;
        Ok(response.into_inner().boxed())
    }
}
