use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{DispatcherConfig, RateLimitConfig};
use crate::error::{DispatcherError, Error};
use crate::rate_limiter::RateLimiter;
use crate::test_helpers::{StubTransport, echo_transport, response_for};
use crate::types::Request;

use super::{Dispatcher, DispatcherState};

/// Limiter generous enough to never gate a test unless it wants gating.
fn open_limiter() -> RateLimiter {
    RateLimiter::new(&RateLimitConfig {
        rate: 10_000,
        interval: Duration::from_secs(1),
        burst: 10_000,
    })
}

fn dispatcher_with(
    workers: usize,
    queue_capacity: usize,
    transport: Arc<StubTransport>,
) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        DispatcherConfig {
            workers,
            queue_capacity,
        },
        open_limiter(),
        transport,
    ))
}

fn request(path: &str) -> Request {
    let url = Url::parse(&format!("https://example.com{path}")).unwrap();
    Request::get(url)
}

#[tokio::test]
async fn dispatch_before_start_fails_deterministically() {
    let dispatcher = dispatcher_with(2, 4, echo_transport().into_arc());
    let cancel = CancellationToken::new();

    let result = dispatcher.dispatch(request("/a"), &cancel).await;
    assert!(matches!(
        result,
        Err(Error::Dispatcher(DispatcherError::NotStarted))
    ));
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
}

#[tokio::test]
async fn start_is_idempotent() {
    let dispatcher = dispatcher_with(2, 4, echo_transport().into_arc());
    dispatcher.start().unwrap();
    dispatcher.start().unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Running);

    let cancel = CancellationToken::new();
    let response = dispatcher.dispatch(request("/a"), &cancel).await.unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatches_deliver_to_their_submitters() {
    let transport = echo_transport().into_arc();
    let dispatcher = dispatcher_with(4, 8, Arc::clone(&transport));
    dispatcher.start().unwrap();

    let mut handles = Vec::new();
    for n in 0..20 {
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let path = format!("/item/{n}");
            let response = dispatcher.dispatch(request(&path), &cancel).await.unwrap();
            (path, response)
        }));
    }

    for handle in handles {
        let (path, response) = handle.await.unwrap();
        // The echo transport proves each submitter got its own response
        assert!(
            response.text().ends_with(&path),
            "submitter for {path} received {}",
            response.text()
        );
    }

    assert_eq!(transport.calls(), 20, "each request executed exactly once");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_drains_queued_and_in_flight_work() {
    let transport = echo_transport()
        .with_delay(Duration::from_millis(50))
        .into_arc();
    let dispatcher = dispatcher_with(1, 8, Arc::clone(&transport));
    dispatcher.start().unwrap();

    let mut handles = Vec::new();
    for n in 0..4 {
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            dispatcher
                .dispatch(request(&format!("/queued/{n}")), &cancel)
                .await
        }));
    }

    // Let all four submissions land in the queue before closing
    tokio::time::sleep(Duration::from_millis(20)).await;
    dispatcher.close().await;

    assert_eq!(
        transport.calls(),
        4,
        "close must not return before accepted work is executed"
    );
    for handle in handles {
        assert!(handle.await.unwrap().is_ok(), "no accepted request dropped");
    }
    assert_eq!(dispatcher.state(), DispatcherState::Closed);
}

#[tokio::test]
async fn dispatch_after_close_fails_instead_of_hanging() {
    let dispatcher = dispatcher_with(2, 4, echo_transport().into_arc());
    dispatcher.start().unwrap();
    dispatcher.close().await;

    let cancel = CancellationToken::new();
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        dispatcher.dispatch(request("/late"), &cancel),
    )
    .await
    .expect("post-close dispatch must fail promptly, not hang");
    assert!(matches!(
        result,
        Err(Error::Dispatcher(DispatcherError::Closed))
    ));
}

#[tokio::test]
async fn close_twice_is_a_noop() {
    let dispatcher = dispatcher_with(2, 4, echo_transport().into_arc());
    dispatcher.start().unwrap();
    dispatcher.close().await;
    dispatcher.close().await;
    assert_eq!(dispatcher.state(), DispatcherState::Closed);
}

#[tokio::test]
async fn close_without_start_marks_closed() {
    let dispatcher = dispatcher_with(2, 4, echo_transport().into_arc());
    dispatcher.close().await;
    assert_eq!(dispatcher.state(), DispatcherState::Closed);

    assert!(matches!(
        dispatcher.start(),
        Err(Error::Dispatcher(DispatcherError::Closed))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_unblocks_a_waiting_submitter() {
    let transport = echo_transport()
        .with_delay(Duration::from_millis(500))
        .into_arc();
    let dispatcher = dispatcher_with(1, 4, transport);
    dispatcher.start().unwrap();

    let cancel = CancellationToken::new();
    let handle = {
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.dispatch(request("/slow"), &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_millis(200), handle)
        .await
        .expect("cancelled dispatch should return before the transport finishes")
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    // The dispatcher is still usable by other submitters
    let fresh = CancellationToken::new();
    let response = dispatcher.dispatch(request("/after"), &fresh).await.unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rate_limiter_gates_the_worker_pool() {
    // Burst 1, one token per 100ms: three requests need two refills
    let limiter = RateLimiter::new(&RateLimitConfig {
        rate: 1,
        interval: Duration::from_millis(100),
        burst: 1,
    });
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig {
            workers: 2,
            queue_capacity: 4,
        },
        limiter,
        echo_transport().into_arc(),
    ));
    dispatcher.start().unwrap();

    let start = Instant::now();
    let cancel = CancellationToken::new();
    for n in 0..3 {
        dispatcher
            .dispatch(request(&format!("/gated/{n}")), &cancel)
            .await
            .unwrap();
    }
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(120),
        "three requests at 1/100ms should take ~200ms, took {:?}",
        elapsed
    );
    dispatcher.close().await;
}

#[tokio::test]
async fn transport_errors_reach_the_submitter_unretried() {
    let transport = StubTransport::new(|_, _| Err(Error::TransportTimeout)).into_arc();
    let dispatcher = dispatcher_with(1, 4, Arc::clone(&transport));
    dispatcher.start().unwrap();

    let cancel = CancellationToken::new();
    let result = dispatcher.dispatch(request("/to"), &cancel).await;
    assert!(matches!(result, Err(Error::TransportTimeout)));
    assert_eq!(
        transport.calls(),
        1,
        "the dispatcher itself never retries"
    );
}

#[tokio::test]
async fn non_success_statuses_are_delivered_not_swallowed() {
    let transport =
        StubTransport::new(|request, _| Ok(response_for(request, 404, "missing"))).into_arc();
    let dispatcher = dispatcher_with(1, 4, transport);
    dispatcher.start().unwrap();

    let cancel = CancellationToken::new();
    let response = dispatcher.dispatch(request("/gone"), &cancel).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.text(), "missing");
}
