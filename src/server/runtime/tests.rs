//! Tests for hub runtime behaviour.

use std::{
    io,
    sync::{Arc, Mutex},
};

use rstest::rstest;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::yield_now,
    time::{Duration, Instant, advance, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{AcceptLoopOptions, BackoffConfig, MockAcceptListener, accept_loop};
use crate::{
    codec::JsonCodec,
    dispatch::{HandlerError, HandlerTable},
    message::{Command, DeviceId, Message, MessageKind},
    registry::DeviceRegistry,
    server::{
        DeviceHub,
        Unbound,
        connection::ConnectionContext,
        test_util::{bind_hub, free_listener, hub, listener_addr, wait_for},
    },
};

fn context() -> Arc<ConnectionContext> {
    Arc::new(ConnectionContext {
        codec: Arc::new(JsonCodec),
        dispatcher: Arc::new(HandlerTable::new()),
        registry: Arc::new(DeviceRegistry::new()),
        max_frame_length: None,
    })
}

#[rstest]
#[tokio::test]
async fn run_with_immediate_shutdown(
    hub: DeviceHub<Unbound>,
    free_listener: std::net::TcpListener,
) {
    let hub = bind_hub(hub, free_listener);
    let shutdown_future = async { tokio::time::sleep(Duration::from_millis(10)).await };
    let result = timeout(
        Duration::from_millis(1000),
        hub.run_with_shutdown(shutdown_future),
    )
    .await;
    assert!(result.is_ok());
    assert!(result.expect("hub did not finish in time").is_ok());
}

#[rstest]
#[tokio::test]
async fn ready_signal_fires_after_start(
    hub: DeviceHub<Unbound>,
    free_listener: std::net::TcpListener,
) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let hub = bind_hub(hub.ready_signal(ready_tx), free_listener);
    let task = tokio::spawn(hub.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    timeout(Duration::from_secs(1), ready_rx)
        .await
        .expect("ready in time")
        .expect("ready sent");
    let _ = stop_tx.send(());
    task.await.expect("join").expect("hub run");
}

#[rstest]
#[tokio::test]
async fn end_to_end_bind_dispatch_and_send(
    hub: DeviceHub<Unbound>,
    free_listener: std::net::TcpListener,
) {
    let addr = listener_addr(&free_listener);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    hub.dispatcher()
        .register("gt", MessageKind::Response, move |msg: Message| {
            let log = Arc::clone(&log);
            async move {
                log.lock().expect("lock").push(msg.name);
                Ok::<(), HandlerError>(())
            }
        });
    let sender = hub.sender();
    let registry = Arc::clone(hub.registry());
    let hub = bind_hub(hub, free_listener);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(hub.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(b"{\"dev\":\"gt\",\"tp\":\"res\",\"res\":\"door\"}\n")
        .await
        .expect("write");

    let gt = DeviceId::from("gt");
    assert!(wait_for(Duration::from_secs(2), || registry.is_connected(&gt)).await);
    assert!(wait_for(Duration::from_secs(2), || !seen.lock().expect("lock").is_empty()).await);

    let command = Command::new("door").with_action("close");
    assert!(sender.send(&gt, &command).await);
    let mut line = String::new();
    BufReader::new(read_half)
        .read_line(&mut line)
        .await
        .expect("read command");
    assert!(line.contains("\"cmd\":\"door\""));
    assert!(line.ends_with('\n'));

    let _ = stop_tx.send(());
    task.await.expect("join").expect("hub run");
    assert!(!registry.is_connected(&gt));
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test]
async fn accept_loop_stops_on_shutdown_signal() {
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let listener = Arc::new(
        TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener"),
    );

    tracker.spawn(accept_loop(
        listener,
        AcceptLoopOptions {
            context: context(),
            shutdown: token.clone(),
            tracker: tracker.clone(),
            backoff: BackoffConfig::default(),
        },
    ));

    token.cancel();
    tracker.close();

    let result = timeout(Duration::from_millis(100), tracker.wait()).await;
    assert!(result.is_ok());
}

/// Creates a mock listener that fails every call, recording when each happened.
fn setup_backoff_mock_listener(
    calls: &Arc<Mutex<Vec<Instant>>>,
    num_calls: usize,
) -> MockAcceptListener {
    let mut listener = MockAcceptListener::new();
    let call_log = Arc::clone(calls);
    listener
        .expect_accept()
        .returning(move || {
            let call_log = Arc::clone(&call_log);
            Box::pin(async move {
                call_log.lock().expect("lock").push(Instant::now());
                Err(io::Error::other("mock error"))
            })
        })
        .times(num_calls);
    listener
        .expect_local_addr()
        .returning(|| Ok("127.0.0.1:0".parse().expect("addr parse")))
        .times(num_calls);
    listener
}

#[tokio::test(start_paused = true)]
async fn accept_errors_back_off_exponentially() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let listener = Arc::new(setup_backoff_mock_listener(&calls, 4));
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let backoff = BackoffConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    };

    tracker.spawn(accept_loop(
        listener,
        AcceptLoopOptions {
            context: context(),
            shutdown: token.clone(),
            tracker: tracker.clone(),
            backoff,
        },
    ));

    yield_now().await;
    assert_eq!(calls.lock().expect("lock").len(), 1);

    for ms in [5, 10, 20] {
        advance(Duration::from_millis(ms)).await;
        yield_now().await;
    }

    token.cancel();
    advance(Duration::from_millis(20)).await;
    yield_now().await;
    tracker.close();
    tracker.wait().await;

    let calls = calls.lock().expect("lock");
    let intervals: Vec<Duration> = calls
        .windows(2)
        .filter_map(|pair| match pair {
            [a, b] => b.checked_duration_since(*a),
            _ => None,
        })
        .collect();
    assert_eq!(
        intervals,
        vec![
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(20),
        ]
    );
}

#[test]
fn next_delay_is_capped() {
    let backoff = BackoffConfig {
        initial_delay: Duration::from_millis(400),
        max_delay: Duration::from_secs(1),
    };
    assert_eq!(
        backoff.next_delay(Duration::from_millis(400)),
        Duration::from_millis(800)
    );
    assert_eq!(
        backoff.next_delay(Duration::from_millis(800)),
        Duration::from_secs(1)
    );
}
