//! Handler registration.
//!
//! A [`RegistryBuilder`] maps operation names to handlers of one of the four
//! call shapes. Each typed handler is erased into a [`BoxedHandler`] that
//! works on raw frames, so the dispatcher can run every shape the same way.
//! Once built, a [`Registry`] is immutable for the lifetime of the server.
//!
//! Dependencies are injected by capture: a handler closure owns (clones of)
//! whatever shared handles it needs.
//!
//! ```ignore
//! let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::default());
//! let registry = RegistryBuilder::new()
//!     .unary(READ_BLOG, {
//!         let store = Arc::clone(&store);
//!         move |_ctx, req: ReadBlogRequest| read_blog(Arc::clone(&store), req)
//!     })
//!     .build()?;
//! ```

use crate::{
    call::{CallContext, Shape},
    error::{self, Error},
    stream::{Frames, ResponseSink, ResponseTx, Streaming},
};
use futures::future::BoxFuture;
use prost::Message;
use std::{collections::HashMap, sync::Arc};
use tonic::Status;

/// A handler erased to operate on frames.
///
/// The returned future resolves when the handler is done producing responses.
/// `Err` becomes the terminal status of the call.
pub type BoxedHandler = Arc<
    dyn Fn(CallContext, Frames, ResponseTx) -> BoxFuture<'static, Result<(), Status>>
        + Send
        + Sync,
>;

/// A registered handler together with its shape.
#[derive(Clone)]
pub struct Registration {
    shape: Shape,
    handler: BoxedHandler,
}

impl Registration {
    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(String, Registration)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-request, one-response handler.
    ///
    /// The handler's `Ok` and `Err` are mutually exclusive: an error means no
    /// response message is sent.
    pub fn unary<Req, Resp, F, Fut>(self, operation: impl Into<String>, handler: F) -> Self
    where
        Req: Message + Default + 'static,
        Resp: Message + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let boxed: BoxedHandler = Arc::new(move |ctx: CallContext, frames: Frames, tx: ResponseTx| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let request = Streaming::<Req>::new(frames, ctx.clone()).single().await?;
                let response = handler(ctx.clone(), request).await?;
                ResponseSink::new(tx, ctx).send(response).await
            }) as BoxFuture<'static, Result<(), Status>>
        });
        self.push(operation, Shape::Unary, boxed)
    }

    /// Registers a one-request, many-responses handler.
    pub fn server_streaming<Req, Resp, F, Fut>(
        self,
        operation: impl Into<String>,
        handler: F,
    ) -> Self
    where
        Req: Message + Default + 'static,
        Resp: Message + 'static,
        F: Fn(CallContext, Req, ResponseSink<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let boxed: BoxedHandler = Arc::new(move |ctx: CallContext, frames: Frames, tx: ResponseTx| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let request = Streaming::<Req>::new(frames, ctx.clone()).single().await?;
                handler(ctx.clone(), request, ResponseSink::new(tx, ctx)).await
            }) as BoxFuture<'static, Result<(), Status>>
        });
        self.push(operation, Shape::ServerStreaming, boxed)
    }

    /// Registers a many-requests, one-response handler.
    ///
    /// The handler reads requests until `Ok(None)` and returns the aggregate.
    pub fn client_streaming<Req, Resp, F, Fut>(
        self,
        operation: impl Into<String>,
        handler: F,
    ) -> Self
    where
        Req: Message + Default + 'static,
        Resp: Message + 'static,
        F: Fn(CallContext, Streaming<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let boxed: BoxedHandler = Arc::new(move |ctx: CallContext, frames: Frames, tx: ResponseTx| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let requests = Streaming::<Req>::new(frames, ctx.clone());
                let response = handler(ctx.clone(), requests).await?;
                ResponseSink::new(tx, ctx).send(response).await
            }) as BoxFuture<'static, Result<(), Status>>
        });
        self.push(operation, Shape::ClientStreaming, boxed)
    }

    /// Registers a handler with independent request and response streams.
    pub fn bidi_streaming<Req, Resp, F, Fut>(
        self,
        operation: impl Into<String>,
        handler: F,
    ) -> Self
    where
        Req: Message + Default + 'static,
        Resp: Message + 'static,
        F: Fn(CallContext, Streaming<Req>, ResponseSink<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let boxed: BoxedHandler = Arc::new(move |ctx: CallContext, frames: Frames, tx: ResponseTx| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let requests = Streaming::<Req>::new(frames, ctx.clone());
                handler(ctx.clone(), requests, ResponseSink::new(tx, ctx)).await
            }) as BoxFuture<'static, Result<(), Status>>
        });
        self.push(operation, Shape::BidiStreaming, boxed)
    }

    /// Registers an already erased handler.
    pub fn raw(self, operation: impl Into<String>, shape: Shape, handler: BoxedHandler) -> Self {
        self.push(operation, shape, handler)
    }

    fn push(mut self, operation: impl Into<String>, shape: Shape, handler: BoxedHandler) -> Self {
        self.entries
            .push((operation.into(), Registration { shape, handler }));
        self
    }

    /// Freezes the registrations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateOperation`] if a name was registered twice.
    pub fn build(self) -> error::Result<Registry> {
        let mut handlers = HashMap::with_capacity(self.entries.len());
        for (operation, registration) in self.entries {
            if handlers.contains_key(&operation) {
                return Err(Error::DuplicateOperation { operation });
            }
            handlers.insert(operation, registration);
        }
        Ok(Registry { handlers })
    }
}

/// Immutable operation table.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Registration>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn get(&self, operation: &str) -> Option<&Registration> {
        self.handlers.get(operation)
    }

    pub fn shape_of(&self, operation: &str) -> Option<Shape> {
        self.get(operation).map(Registration::shape)
    }

    /// Registered operations, sorted by name.
    pub fn operations(&self) -> Vec<(&str, Shape)> {
        let mut ops: Vec<_> = self
            .handlers
            .iter()
            .map(|(name, reg)| (name.as_str(), reg.shape))
            .collect();
        ops.sort_unstable_by_key(|(name, _)| *name);
        ops
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
