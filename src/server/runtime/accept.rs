//! Accept loop for the hub runtime.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::BackoffConfig;
use crate::{
    registry::ConnectionId,
    server::connection::{ConnectionContext, spawn_connection_task},
};

/// Source of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

pub(in crate::server) struct AcceptLoopOptions {
    pub context: Arc<ConnectionContext>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
}

struct AcceptState<'a> {
    options: &'a AcceptLoopOptions,
    next_id: AtomicU64,
}

impl AcceptState<'_> {
    fn allocate_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Accept connections until `options.shutdown` is cancelled.
///
/// Each accepted stream gets a fresh [`ConnectionId`] and a tracked task.
/// Accept failures sleep with exponential back-off and never end the loop.
pub(in crate::server) async fn accept_loop<L>(listener: Arc<L>, options: AcceptLoopOptions)
where
    L: AcceptListener + 'static,
{
    let backoff = options.backoff.normalized();
    debug_assert!(
        backoff.initial_delay <= backoff.max_delay,
        "BackoffConfig invariant violated: initial_delay > max_delay"
    );
    let state = AcceptState {
        options: &options,
        next_id: AtomicU64::new(1),
    };
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) = accept_iteration(&listener, &state, &backoff, delay).await {
        delay = next_delay;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<L>(
    listener: &Arc<L>,
    state: &AcceptState<'_>,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener + 'static,
{
    let options = state.options;
    select! {
        biased;

        () = options.shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, _)) => {
                spawn_connection_task(
                    stream,
                    state.allocate_id(),
                    &options.context,
                    &options.shutdown,
                    &options.tracker,
                );
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                sleep(delay).await;
                backoff.next_delay(delay)
            }
        }),
    }
}
