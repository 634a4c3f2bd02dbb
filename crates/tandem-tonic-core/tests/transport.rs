//! End-to-end calls over a loopback gRPC connection.

use core::time::Duration;
use std::{net::SocketAddr, sync::Arc};
use tandem::{
    CallContext, CallError, CallOptions, CallState, Client, DispatchConfig, Dispatcher, Registry,
    ResponseSink, Streaming, multiplex,
};
use tandem_tonic_core::{
    RpcServer, TonicTransport,
    proto::calculator::{self, *},
};
use tokio::{net::TcpListener, sync::oneshot};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{
    Code, Status,
    codec::CompressionEncoding,
    transport::{Endpoint, Server},
};

const SLOW_SUM: &str = "/calculator.CalculatorService/SlowSum";

fn registry() -> Registry {
    Registry::builder()
        .unary(calculator::SUM, |_ctx, req: SumRequest| async move {
            Ok::<_, Status>(SumResponse {
                sum_result: req.first_number + req.second_number,
            })
        })
        .server_streaming(
            calculator::PRIME_NUMBER_DECOMPOSITION,
            |_ctx, req: PrimeNumberDecompositionRequest,
             mut sink: ResponseSink<PrimeNumberDecompositionResponse>| async move {
                let mut n = req.number;
                let mut divisor = 2;
                while n > 1 {
                    if n % divisor == 0 {
                        sink.send(PrimeNumberDecompositionResponse {
                            prime_factor: divisor,
                        })
                        .await?;
                        n /= divisor;
                    } else {
                        divisor += 1;
                    }
                }
                if req.number == 12 {
                    return Err(Status::invalid_argument("twelve is rejected after streaming"));
                }
                Ok(())
            },
        )
        .client_streaming(
            calculator::COMPUTE_AVERAGE,
            |_ctx, mut requests: Streaming<ComputeAverageRequest>| async move {
                let (mut sum, mut count) = (0i64, 0u32);
                while let Some(req) = requests.message().await? {
                    sum += i64::from(req.number);
                    count += 1;
                }
                if count == 0 {
                    return Err(Status::invalid_argument("no numbers received"));
                }
                Ok(ComputeAverageResponse {
                    average: sum as f64 / f64::from(count),
                })
            },
        )
        .bidi_streaming(
            calculator::FIND_MAXIMUM,
            |_ctx,
             mut requests: Streaming<FindMaximumRequest>,
             mut sink: ResponseSink<FindMaximumResponse>| async move {
                let mut max: Option<i32> = None;
                while let Some(req) = requests.message().await? {
                    if max.is_none_or(|m| req.number > m) {
                        max = Some(req.number);
                        sink.send(FindMaximumResponse {
                            maximum: req.number,
                        })
                        .await?;
                    }
                }
                Ok::<_, Status>(())
            },
        )
        .unary(SLOW_SUM, |ctx: CallContext, req: SumRequest| async move {
            for _ in 0..3 {
                ctx.check()?;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Ok::<_, Status>(SumResponse {
                sum_result: req.first_number + req.second_number,
            })
        })
        .build()
        .unwrap()
}

struct Harness {
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    stop: Option<oneshot::Sender<()>>,
}

impl Harness {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(registry(), DispatchConfig::default()));
        let service = RpcServer::<CalculatorService>::new(Arc::clone(&dispatcher))
            .accept_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Gzip);

        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = stopped.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            dispatcher,
            stop: Some(stop),
        }
    }

    async fn client(&self) -> Client<TonicTransport> {
        let endpoint = Endpoint::from_shared(format!("http://{}", self.addr)).unwrap();
        Client::new(TonicTransport::connect(endpoint).await.unwrap())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unary_round_trip() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    let resp: SumResponse = client
        .unary(
            calculator::SUM,
            SumRequest {
                first_number: 10,
                second_number: 25,
            },
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(resp.sum_result, 35);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_streaming_keeps_partial_results_before_error() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    let factors: Vec<i64> = client
        .server_streaming::<_, PrimeNumberDecompositionResponse>(
            calculator::PRIME_NUMBER_DECOMPOSITION,
            PrimeNumberDecompositionRequest { number: 125 },
            CallOptions::default(),
        )
        .await
        .unwrap()
        .collect()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.prime_factor)
        .collect();
    assert_eq!(factors, vec![5, 5, 5]);

    let mut stream = client
        .server_streaming::<_, PrimeNumberDecompositionResponse>(
            calculator::PRIME_NUMBER_DECOMPOSITION,
            PrimeNumberDecompositionRequest { number: 12 },
            CallOptions::default(),
        )
        .await
        .unwrap();
    let mut seen = Vec::new();
    let err = loop {
        match stream.message().await {
            Ok(Some(resp)) => seen.push(resp.prime_factor),
            Ok(None) => panic!("expected an error status"),
            Err(err) => break err,
        }
    };
    assert_eq!(seen, vec![2, 2, 3]);
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(stream.handle().state(), CallState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_streaming_average() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    let mut call = client
        .client_streaming::<ComputeAverageRequest, ComputeAverageResponse>(
            calculator::COMPUTE_AVERAGE,
            CallOptions::default(),
        );
    for number in [12, 4, 23, 13, 20] {
        call.send(ComputeAverageRequest { number }).await.unwrap();
    }
    let resp = call.close_and_recv().await.unwrap();
    assert!((resp.average - 14.4).abs() < f64::EPSILON);

    let empty = client
        .client_streaming::<ComputeAverageRequest, ComputeAverageResponse>(
            calculator::COMPUTE_AVERAGE,
            CallOptions::default(),
        );
    let err = empty.close_and_recv().await.unwrap_err();
    assert_eq!(err, CallError::InvalidArgument("no numbers received".into()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bidi_running_maximum_with_compression() {
    let harness = Harness::start().await;
    let endpoint = Endpoint::from_shared(format!("http://{}", harness.addr)).unwrap();
    let transport = TonicTransport::connect(endpoint)
        .await
        .unwrap()
        .with_compression(CompressionEncoding::Gzip);
    let client = Client::new(transport);

    let call = client.bidi_streaming::<FindMaximumRequest, FindMaximumResponse>(
        calculator::FIND_MAXIMUM,
        CallOptions::default(),
    );
    let outbound = futures::stream::iter(
        [3, 7, 2, 15, 22, 10, 8, 24, 1].map(|number| FindMaximumRequest { number }),
    );
    let result = multiplex(call, outbound, |_: &FindMaximumResponse| {})
        .await
        .unwrap();

    let maxima: Vec<i32> = result.responses.iter().map(|r| r.maximum).collect();
    assert_eq!(maxima, vec![3, 7, 15, 22, 24]);
    assert_eq!(result.sent, 9);
    assert_eq!(result.state, CallState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deadline_reaches_both_sides() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    let err = client
        .unary::<_, SumResponse>(
            SLOW_SUM,
            SumRequest::default(),
            CallOptions::with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(err.is_retryable());

    // The handler saw the propagated grpc-timeout and gave up on its own.
    for _ in 0..50 {
        if harness.dispatcher.inflight() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(harness.dispatcher.inflight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_operation_is_unimplemented() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    let err = client
        .unary::<_, SumResponse>(
            "/calculator.CalculatorService/Divide",
            SumRequest::default(),
            CallOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
}
