//! Shared fixtures for the unit tests of this crate.

use crate::{
    call::{CallContext, Shape},
    client::Client,
    dispatch::{CallObserver, DispatchConfig, Dispatcher},
    handler::RegistryBuilder,
    stream::{ResponseSink, Streaming},
    transport::LocalTransport,
};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tonic::{Code, Status};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Number {
    #[prost(int64, tag = "1")]
    pub value: i64,
}

pub fn n(value: i64) -> Number {
    Number { value }
}

pub const ECHO: &str = "/test.Numbers/Echo";
pub const RANGE: &str = "/test.Numbers/Range";
pub const SUM: &str = "/test.Numbers/Sum";
pub const RUNNING_MAX: &str = "/test.Numbers/RunningMax";
pub const SLOW: &str = "/test.Numbers/Slow";
pub const HANG: &str = "/test.Numbers/Hang";
pub const REJECT: &str = "/test.Numbers/Reject";
pub const FIRST: &str = "/test.Numbers/First";

/// Records the terminal code of every finished call.
#[derive(Default)]
pub struct Recorder(pub Mutex<Vec<(String, Code)>>);

impl Recorder {
    pub fn codes(&self) -> Vec<Code> {
        self.0.lock().iter().map(|(_, code)| *code).collect()
    }
}

impl CallObserver for Recorder {
    fn call_finished(&self, operation: &str, _shape: Shape, code: Code, _elapsed: Duration) {
        self.0.lock().push((operation.to_owned(), code));
    }
}

pub fn registry() -> RegistryBuilder {
    RegistryBuilder::new()
        .unary(ECHO, |_ctx, req: Number| async move {
            if req.value < 0 {
                return Err(Status::invalid_argument(format!(
                    "negative value: {}",
                    req.value
                )));
            }
            Ok(req)
        })
        .server_streaming(
            RANGE,
            |_ctx, req: Number, mut sink: ResponseSink<Number>| async move {
                for value in 0..req.value {
                    sink.send(n(value)).await?;
                }
                Ok::<_, Status>(())
            },
        )
        .client_streaming(SUM, |_ctx, mut requests: Streaming<Number>| async move {
            let mut total = 0;
            while let Some(req) = requests.message().await? {
                total += req.value;
            }
            Ok::<_, Status>(n(total))
        })
        .bidi_streaming(
            RUNNING_MAX,
            |_ctx, mut requests: Streaming<Number>, mut sink: ResponseSink<Number>| async move {
                let mut max: Option<i64> = None;
                while let Some(req) = requests.message().await? {
                    if max.is_none_or(|m| req.value > m) {
                        max = Some(req.value);
                        sink.send(req).await?;
                    }
                }
                Ok::<_, Status>(())
            },
        )
        .unary(SLOW, |ctx: CallContext, req: Number| async move {
            for _ in 0..req.value {
                ctx.check()?;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            ctx.check()?;
            Ok::<_, Status>(req)
        })
        .bidi_streaming(
            HANG,
            |ctx: CallContext, _requests: Streaming<Number>, _sink: ResponseSink<Number>| async move {
                Err::<(), _>(ctx.done().await)
            },
        )
        .bidi_streaming(
            FIRST,
            |_ctx, mut requests: Streaming<Number>, mut sink: ResponseSink<Number>| async move {
                if let Some(req) = requests.message().await? {
                    sink.send(req).await?;
                }
                Ok::<_, Status>(())
            },
        )
        .bidi_streaming(
            REJECT,
            |_ctx, mut requests: Streaming<Number>, _sink: ResponseSink<Number>| async move {
                let first = requests.message().await?.unwrap_or_default();
                Err::<(), _>(Status::invalid_argument(format!(
                    "rejected {}",
                    first.value
                )))
            },
        )
}

pub struct Fixture {
    pub client: Client<LocalTransport>,
    pub dispatcher: Arc<Dispatcher>,
    pub recorder: Arc<Recorder>,
}

impl Fixture {
    pub fn new() -> Self {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Arc::new(
            Dispatcher::new(registry().build().unwrap(), DispatchConfig::default())
                .with_observer(recorder.clone()),
        );
        let client = Client::new(LocalTransport::new(Arc::clone(&dispatcher)));
        Self {
            client,
            dispatcher,
            recorder,
        }
    }

    /// Waits until every dispatched call has finished.
    pub async fn settle(&self) {
        while self.dispatcher.inflight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
