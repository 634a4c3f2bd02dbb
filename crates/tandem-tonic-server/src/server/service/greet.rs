//! `greet.GreetService` handlers.

use core::time::Duration;
use tandem::{CallContext, RegistryBuilder, ResponseSink, Streaming};
use tandem_tonic_core::proto::greet::*;
use tonic::Status;

/// Pacing of the slow greetings.
#[derive(Clone, Copy, Debug)]
pub struct GreetSettings {
    /// Responses sent by `GreetManyTimes`.
    pub repeat: u32,
    /// Pause between two greetings, and the length of one
    /// `GreetWithDeadline` step.
    pub interval: Duration,
}

impl Default for GreetSettings {
    fn default() -> Self {
        Self {
            repeat: 5,
            interval: Duration::from_secs(1),
        }
    }
}

const DEADLINE_STEPS: u32 = 3;

pub fn register(builder: RegistryBuilder, settings: GreetSettings) -> RegistryBuilder {
    builder
        .unary(GREET, greet)
        .server_streaming(GREET_MANY_TIMES, move |ctx, req, sink| {
            greet_many_times(ctx, req, sink, settings)
        })
        .client_streaming(LONG_GREET, long_greet)
        .bidi_streaming(GREET_EVERYONE, greet_everyone)
        .unary(GREET_WITH_DEADLINE, move |ctx, req| {
            greet_with_deadline(ctx, req, settings)
        })
}

fn require(greeting: Option<Greeting>) -> Result<Greeting, Status> {
    greeting.ok_or_else(|| Status::invalid_argument("Request is missing a greeting"))
}

fn hello(greeting: &Greeting) -> String {
    format!("Hello, {} {}", greeting.first_name, greeting.last_name)
}

async fn greet(_ctx: CallContext, req: GreetRequest) -> Result<GreetResponse, Status> {
    tracing::info!("Greet invoked with {:?}", req);
    let greeting = require(req.greeting)?;
    Ok(GreetResponse {
        result: hello(&greeting),
    })
}

async fn greet_many_times(
    _ctx: CallContext,
    req: GreetManyTimesRequest,
    mut sink: ResponseSink<GreetManyTimesResponse>,
    settings: GreetSettings,
) -> Result<(), Status> {
    tracing::info!("GreetManyTimes invoked with {:?}", req);
    let greeting = require(req.greeting)?;
    for i in 0..settings.repeat {
        if i > 0 {
            tokio::time::sleep(settings.interval).await;
        }
        sink.send(GreetManyTimesResponse {
            result: format!("{} number {i}", hello(&greeting)),
        })
        .await?;
    }
    Ok(())
}

async fn long_greet(
    _ctx: CallContext,
    mut requests: Streaming<LongGreetRequest>,
) -> Result<LongGreetResponse, Status> {
    tracing::info!("LongGreet invoked with a streaming request");
    let mut result = String::new();
    while let Some(req) = requests.message().await? {
        let greeting = require(req.greeting)?;
        result.push_str(&hello(&greeting));
        result.push_str("!\n");
    }
    Ok(LongGreetResponse { result })
}

async fn greet_everyone(
    _ctx: CallContext,
    mut requests: Streaming<GreetEveryoneRequest>,
    mut sink: ResponseSink<GreetEveryoneResponse>,
) -> Result<(), Status> {
    tracing::info!("GreetEveryone invoked with a streaming request");
    while let Some(req) = requests.message().await? {
        tracing::debug!("Received: {:?}", req);
        let greeting = require(req.greeting)?;
        sink.send(GreetEveryoneResponse {
            result: hello(&greeting),
        })
        .await?;
    }
    Ok(())
}

/// Answers after three intervals, giving up as soon as the caller cancels or
/// the deadline passes.
async fn greet_with_deadline(
    ctx: CallContext,
    req: GreetWithDeadlineRequest,
    settings: GreetSettings,
) -> Result<GreetWithDeadlineResponse, Status> {
    tracing::info!("GreetWithDeadline invoked with {:?}", req);
    let greeting = require(req.greeting)?;
    for _ in 0..DEADLINE_STEPS {
        if let Err(status) = ctx.check() {
            tracing::info!("The client cancelled the request: {}", status.message());
            return Err(status);
        }
        tokio::time::sleep(settings.interval).await;
    }
    Ok(GreetWithDeadlineResponse {
        result: hello(&greeting),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::service::testing::client;
    use tandem::{CallOptions, Client, LocalTransport};
    use tokio::time::Instant;
    use tonic::Code;

    fn ada() -> Greeting {
        Greeting::new("Ada", "Lovelace")
    }

    fn greeter() -> Client<LocalTransport> {
        client(register(RegistryBuilder::new(), GreetSettings::default()))
    }

    #[tokio::test]
    async fn greet_once() {
        let resp: GreetResponse = greeter()
            .unary(GREET, GreetRequest::from(ada()), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.result, "Hello, Ada Lovelace");
    }

    #[tokio::test]
    async fn missing_greeting_is_invalid() {
        let err = greeter()
            .unary::<_, GreetResponse>(GREET, GreetRequest::default(), CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test(start_paused = true)]
    async fn greet_many_times_is_paced() {
        let start = Instant::now();
        let results: Vec<String> = greeter()
            .server_streaming::<_, GreetManyTimesResponse>(
                GREET_MANY_TIMES,
                GreetManyTimesRequest::from(ada()),
                CallOptions::default(),
            )
            .await
            .unwrap()
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.result)
            .collect();

        let expected: Vec<String> = (0..5)
            .map(|i| format!("Hello, Ada Lovelace number {i}"))
            .collect();
        assert_eq!(results, expected);
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn long_greet_concatenates() {
        let client = greeter();
        let mut call = client.client_streaming::<LongGreetRequest, LongGreetResponse>(
            LONG_GREET,
            CallOptions::default(),
        );
        for (first, last) in [("Ada", "Lovelace"), ("Alan", "Turing")] {
            call.send(Greeting::new(first, last).into()).await.unwrap();
        }
        let resp = call.close_and_recv().await.unwrap();
        assert_eq!(resp.result, "Hello, Ada Lovelace!\nHello, Alan Turing!\n");
    }

    #[tokio::test]
    async fn greet_everyone_answers_each_request() {
        let client = greeter();
        let mut call = client.bidi_streaming::<GreetEveryoneRequest, GreetEveryoneResponse>(
            GREET_EVERYONE,
            CallOptions::default(),
        );
        call.send(ada().into()).await.unwrap();
        assert_eq!(
            call.message().await.unwrap().unwrap().result,
            "Hello, Ada Lovelace"
        );
        call.send(Greeting::new("Grace", "Hopper").into()).await.unwrap();
        assert_eq!(
            call.message().await.unwrap().unwrap().result,
            "Hello, Grace Hopper"
        );
        call.close_send();
        assert!(call.message().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_shorter_than_work_is_exceeded() {
        let err = greeter()
            .unary::<_, GreetWithDeadlineResponse>(
                GREET_WITH_DEADLINE,
                GreetWithDeadlineRequest::from(ada()),
                CallOptions::with_timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn generous_deadline_succeeds() {
        let resp = greeter()
            .unary::<_, GreetWithDeadlineResponse>(
                GREET_WITH_DEADLINE,
                GreetWithDeadlineRequest::from(ada()),
                CallOptions::with_timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(resp.result, "Hello, Ada Lovelace");
    }
}
