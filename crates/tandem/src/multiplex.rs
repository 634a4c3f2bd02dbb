//! Concurrent send/receive driver for bidirectional calls.
//!
//! [`multiplex`] runs exactly one send loop and one receive loop for a
//! [`BidiCall`], each on its own task. Completion is reported only once both
//! loops have finished. If the receive loop observes a non-ok terminal status
//! the send loop is stopped through a shared [`CancellationToken`], and the
//! receive error is what the caller sees. When the call ends ok while the
//! send loop still had requests, the responses are kept and the send failure
//! is reported next to them.

use crate::{
    call::CallState,
    client::BidiCall,
    status::CallError,
};
use futures::{Stream, StreamExt};
use prost::Message;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Outcome of a multiplexed call that ended with an ok status.
#[derive(Debug)]
pub struct Multiplexed<T> {
    /// Every response, in arrival order.
    pub responses: Vec<T>,
    /// Number of requests written before the half-close.
    pub sent: usize,
    /// Final state of the call, always [`CallState::Closed`].
    pub state: CallState,
    /// Why the send loop stopped before `outbound` ended, if it did. Usually
    /// the peer finished the call without reading every request.
    pub send_error: Option<CallError>,
}

/// Drives `call` to completion.
///
/// Requests are taken from `outbound` until it ends, then the send direction
/// is half-closed. `on_response` sees each response as it arrives.
///
/// # Errors
///
/// The terminal status of the call if it was not ok. Send failures of a call
/// that ended ok land in [`Multiplexed::send_error`].
pub async fn multiplex<Req, Resp, S, F>(
    call: BidiCall<Req, Resp>,
    outbound: S,
    mut on_response: F,
) -> Result<Multiplexed<Resp>, CallError>
where
    Req: Message + 'static,
    Resp: Message + Default + 'static,
    S: Stream<Item = Req> + Send + 'static,
    F: FnMut(&Resp) + Send + 'static,
{
    let handle = call.handle().clone();
    let (mut requests, mut responses) = call.split();
    let stop = CancellationToken::new();

    let send_stop = stop.clone();
    let send_loop = tokio::spawn(async move {
        let mut outbound = Box::pin(outbound);
        let mut sent = 0;
        let mut send_error = None;
        loop {
            let next = tokio::select! {
                biased;
                () = send_stop.cancelled() => break,
                next = outbound.next() => next,
            };
            let Some(request) = next else {
                break;
            };
            if let Err(err) = requests.send(request).await {
                send_error = Some(err);
                break;
            }
            sent += 1;
        }
        requests.close();
        (sent, send_error)
    });

    let recv_loop = tokio::spawn(async move {
        let mut collected = Vec::new();
        let result = loop {
            match responses.message().await {
                Ok(Some(response)) => {
                    on_response(&response);
                    collected.push(response);
                }
                Ok(None) => break Ok(collected),
                Err(err) => break Err(err),
            }
        };
        if result.is_err() {
            stop.cancel();
        }
        result
    });

    let (sent, received) = tokio::join!(send_loop, recv_loop);

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "Multiplexed call {} finished in state {:?}",
        handle.context().operation(),
        handle.state()
    );

    let responses = received.map_err(task_failed)??;
    let (sent, send_error) = sent.map_err(task_failed)?;

    #[cfg(feature = "tracing")]
    if let Some(err) = &send_error {
        tracing::debug!("Peer finished before all requests were sent: {}", err);
    }

    Ok(Multiplexed {
        responses,
        sent,
        state: handle.state(),
        send_error,
    })
}

fn task_failed(err: JoinError) -> CallError {
    CallError::Internal(format!("Multiplexer task failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        call::CallOptions,
        testing::{FIRST, Fixture, Number, REJECT, RUNNING_MAX, n},
    };
    use futures::stream;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tonic::Code;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn running_max_over_both_directions() {
        let fx = Fixture::new();
        let call = fx
            .client
            .bidi_streaming::<Number, Number>(RUNNING_MAX, CallOptions::default());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let outbound = stream::iter([3, 7, 2, 15, 22, 10, 8, 24, 1].map(n));
        let result = multiplex(call, outbound, {
            let seen = Arc::clone(&seen);
            move |resp: &Number| seen.lock().push(resp.value)
        })
        .await
        .unwrap();

        let maxima: Vec<i64> = result.responses.iter().map(|r| r.value).collect();
        assert_eq!(maxima, vec![3, 7, 15, 22, 24]);
        assert_eq!(*seen.lock(), maxima);
        assert_eq!(result.sent, 9);
        assert_eq!(result.state, CallState::Closed);
        assert!(result.send_error.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn all_negative_stream_still_reports_first_value() {
        let fx = Fixture::new();
        let call = fx
            .client
            .bidi_streaming::<Number, Number>(RUNNING_MAX, CallOptions::default());

        let result = multiplex(call, stream::iter([-5, -9, -2, -3].map(n)), |_: &Number| {})
            .await
            .unwrap();
        let maxima: Vec<i64> = result.responses.iter().map(|r| r.value).collect();
        assert_eq!(maxima, vec![-5, -2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn receive_error_stops_endless_send_loop() {
        let fx = Fixture::new();
        let call = fx
            .client
            .bidi_streaming::<Number, Number>(REJECT, CallOptions::default());

        let err = multiplex(call, stream::repeat(n(4)), |_: &Number| {})
            .await
            .unwrap_err();
        assert_eq!(err, CallError::InvalidArgument("rejected 4".into()));
        assert_eq!(err.code(), Code::InvalidArgument);

        fx.settle().await;
        assert_eq!(fx.recorder.codes(), vec![Code::InvalidArgument]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn early_ok_keeps_responses_and_reports_unsent_requests() {
        let fx = Fixture::new();
        let call = fx
            .client
            .bidi_streaming::<Number, Number>(FIRST, CallOptions::default());

        let result = multiplex(call, stream::repeat(n(4)), |_: &Number| {})
            .await
            .unwrap();
        assert_eq!(result.responses, vec![n(4)]);
        assert!(result.sent >= 1);
        assert_eq!(result.state, CallState::Closed);
        let err = result.send_error.unwrap();
        assert_eq!(err.code(), Code::Internal);

        fx.settle().await;
        assert_eq!(fx.recorder.codes(), vec![Code::Ok]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn empty_outbound_half_closes_immediately() {
        let fx = Fixture::new();
        let call = fx
            .client
            .bidi_streaming::<Number, Number>(RUNNING_MAX, CallOptions::default());

        let result = multiplex(call, stream::empty(), |_: &Number| {}).await.unwrap();
        assert!(result.responses.is_empty());
        assert_eq!(result.sent, 0);
        assert_eq!(result.state, CallState::Closed);
    }
}
