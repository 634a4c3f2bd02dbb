//! `calculator.CalculatorService` handlers.

use tandem::{CallContext, RegistryBuilder, ResponseSink, Streaming};
use tandem_tonic_core::proto::calculator::*;
use tonic::Status;

/// Trial divisions between two cancellation checks.
const DIVISIONS_PER_CHECK: u32 = 1024;

pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .unary(SUM, sum)
        .server_streaming(PRIME_NUMBER_DECOMPOSITION, prime_number_decomposition)
        .client_streaming(COMPUTE_AVERAGE, compute_average)
        .bidi_streaming(FIND_MAXIMUM, find_maximum)
        .unary(SQUARE_ROOT, square_root)
}

async fn sum(_ctx: CallContext, req: SumRequest) -> Result<SumResponse, Status> {
    tracing::info!(
        "Sum invoked with {} and {}",
        req.first_number,
        req.second_number
    );
    let sum_result = req
        .first_number
        .checked_add(req.second_number)
        .ok_or_else(|| {
            Status::invalid_argument(format!(
                "Sum of {} and {} overflows a 32-bit integer",
                req.first_number, req.second_number
            ))
        })?;
    Ok(SumResponse { sum_result })
}

/// Streams the prime factors of `number` in ascending order.
///
/// Yields to the runtime every [`DIVISIONS_PER_CHECK`] trial divisions and
/// stops once the call is cancelled or past its deadline.
async fn prime_number_decomposition(
    ctx: CallContext,
    req: PrimeNumberDecompositionRequest,
    mut sink: ResponseSink<PrimeNumberDecompositionResponse>,
) -> Result<(), Status> {
    tracing::info!("PrimeNumberDecomposition invoked with {}", req.number);
    if req.number < 1 {
        return Err(Status::invalid_argument(format!(
            "Number must be a positive integer, got {}",
            req.number
        )));
    }

    let mut n = req.number;
    let mut divisor = 2;
    let mut budget = DIVISIONS_PER_CHECK;
    while n > 1 {
        budget -= 1;
        if budget == 0 {
            budget = DIVISIONS_PER_CHECK;
            ctx.check()?;
            tokio::task::yield_now().await;
        }
        if divisor > n / divisor {
            // No factor up to sqrt(n) left, so n itself is prime.
            divisor = n;
        }
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
    Ok(())
}

async fn compute_average(
    _ctx: CallContext,
    mut requests: Streaming<ComputeAverageRequest>,
) -> Result<ComputeAverageResponse, Status> {
    tracing::info!("ComputeAverage invoked with a streaming request");
    let mut sum = 0i64;
    let mut count = 0u64;
    while let Some(req) = requests.message().await? {
        sum += i64::from(req.number);
        count += 1;
    }
    if count == 0 {
        return Err(Status::invalid_argument(
            "Cannot average an empty stream of numbers",
        ));
    }
    Ok(ComputeAverageResponse {
        average: sum as f64 / count as f64,
    })
}

/// Emits every value that is strictly greater than all values before it.
///
/// The first value is always emitted, whatever its sign.
async fn find_maximum(
    _ctx: CallContext,
    mut requests: Streaming<FindMaximumRequest>,
    mut sink: ResponseSink<FindMaximumResponse>,
) -> Result<(), Status> {
    tracing::info!("FindMaximum invoked with a streaming request");
    let mut maximum: Option<i32> = None;
    while let Some(req) = requests.message().await? {
        if maximum.is_none_or(|m| req.number > m) {
            maximum = Some(req.number);
            sink.send(FindMaximumResponse {
                maximum: req.number,
            })
            .await?;
        }
    }
    Ok(())
}

async fn square_root(_ctx: CallContext, req: SquareRootRequest) -> Result<SquareRootResponse, Status> {
    tracing::info!("SquareRoot invoked with {}", req.number);
    if req.number < 0 {
        return Err(Status::invalid_argument(format!(
            "Received a negative number: {}",
            req.number
        )));
    }
    Ok(SquareRootResponse {
        number_root: f64::from(req.number).sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::service::testing::{client, dispatch};
    use core::time::Duration;
    use futures::stream;
    use tandem::{CallError, CallOptions, CallState, multiplex};
    use tonic::Code;

    fn calculator() -> tandem::Client<tandem::LocalTransport> {
        client(register(RegistryBuilder::new()))
    }

    async fn factors(client: &tandem::Client<tandem::LocalTransport>, number: i64) -> Result<Vec<i64>, CallError> {
        let stream = client
            .server_streaming::<_, PrimeNumberDecompositionResponse>(
                PRIME_NUMBER_DECOMPOSITION,
                PrimeNumberDecompositionRequest { number },
                CallOptions::default(),
            )
            .await?;
        Ok(stream
            .collect()
            .await?
            .into_iter()
            .map(|r| r.prime_factor)
            .collect())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sum_and_overflow() {
        let client = calculator();
        let resp: SumResponse = client
            .unary(
                SUM,
                SumRequest {
                    first_number: 10,
                    second_number: 25,
                },
                CallOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(resp.sum_result, 35);

        let err = client
            .unary::<_, SumResponse>(
                SUM,
                SumRequest {
                    first_number: i32::MAX,
                    second_number: 1,
                },
                CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn prime_factors() {
        let client = calculator();
        assert_eq!(factors(&client, 125).await.unwrap(), vec![5, 5, 5]);
        assert_eq!(factors(&client, 120).await.unwrap(), vec![2, 2, 2, 3, 5]);
        assert_eq!(factors(&client, 1).await.unwrap(), Vec::<i64>::new());
        assert_eq!(factors(&client, 2_147_483_647).await.unwrap(), vec![2_147_483_647]);

        for n in 2..200 {
            let found = factors(&client, n).await.unwrap();
            assert!(found.windows(2).all(|w| w[0] <= w[1]), "{n}: {found:?}");
            assert_eq!(found.iter().product::<i64>(), n);
        }

        let err = factors(&client, 0).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn large_prime_stops_at_the_deadline() {
        let (client, dispatcher) = dispatch(register(RegistryBuilder::new()));
        let stream = client
            .server_streaming::<_, PrimeNumberDecompositionResponse>(
                PRIME_NUMBER_DECOMPOSITION,
                // 2^63 - 25, the largest prime an i64 holds.
                PrimeNumberDecompositionRequest {
                    number: 9_223_372_036_854_775_783,
                },
                CallOptions::with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap();
        let err = stream.collect().await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);

        tokio::time::timeout(Duration::from_secs(2), async {
            while dispatcher.inflight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("handler kept running past the deadline");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn average() {
        let client = calculator();
        let mut call = client.client_streaming::<ComputeAverageRequest, ComputeAverageResponse>(
            COMPUTE_AVERAGE,
            CallOptions::default(),
        );
        for number in [12, 4, 23, 13, 20] {
            call.send(ComputeAverageRequest { number }).await.unwrap();
        }
        let resp = call.close_and_recv().await.unwrap();
        assert!((resp.average - 14.4).abs() < 1e-9);

        let empty = client.client_streaming::<ComputeAverageRequest, ComputeAverageResponse>(
            COMPUTE_AVERAGE,
            CallOptions::default(),
        );
        let err = empty.close_and_recv().await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn running_maximum() {
        let client = calculator();
        let run = |numbers: Vec<i32>| {
            let call = client.bidi_streaming::<FindMaximumRequest, FindMaximumResponse>(
                FIND_MAXIMUM,
                CallOptions::default(),
            );
            multiplex(
                call,
                stream::iter(numbers.into_iter().map(|number| FindMaximumRequest { number })),
                |_: &FindMaximumResponse| {},
            )
        };

        let result = run(vec![3, 7, 2, 15, 22, 10, 8, 24, 1]).await.unwrap();
        let maxima: Vec<i32> = result.responses.iter().map(|r| r.maximum).collect();
        assert_eq!(maxima, vec![3, 7, 15, 22, 24]);
        assert_eq!(result.state, CallState::Closed);

        let result = run(vec![-8, -3, -5]).await.unwrap();
        let maxima: Vec<i32> = result.responses.iter().map(|r| r.maximum).collect();
        assert_eq!(maxima, vec![-8, -3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn square_root_rejects_negative() {
        let client = calculator();
        let resp: SquareRootResponse = client
            .unary(SQUARE_ROOT, SquareRootRequest { number: 16 }, CallOptions::default())
            .await
            .unwrap();
        assert!((resp.number_root - 4.0).abs() < f64::EPSILON);

        let err = client
            .unary::<_, SquareRootResponse>(
                SQUARE_ROOT,
                SquareRootRequest { number: -5 },
                CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CallError::InvalidArgument("Received a negative number: -5".into())
        );
    }
}
