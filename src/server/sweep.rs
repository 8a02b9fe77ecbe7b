//! Periodic eviction of idle connections.

use std::{sync::Arc, time::Duration};

use tokio::{
    select,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{metrics, registry::DeviceRegistry};

/// Timing for the idle sweep.
#[derive(Clone, Copy, Debug)]
pub(in crate::server) struct SweepOptions {
    pub interval: Duration,
    pub idle_timeout: Duration,
}

/// Evict idle connections every `options.interval` until `shutdown` fires.
///
/// The first sweep runs one interval after start. Evicted connections are
/// cancelled here; their tasks perform the socket teardown.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
pub(in crate::server) async fn sweep_loop(
    registry: Arc<DeviceRegistry>,
    options: SweepOptions,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + options.interval, options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            now = ticker.tick() => sweep_once(&registry, now, options.idle_timeout),
        }
    }
    debug!("idle sweep stopped");
}

fn sweep_once(registry: &DeviceRegistry, now: Instant, idle_timeout: Duration) {
    let evicted = registry.evict_idle(now, idle_timeout);
    for handle in &evicted {
        metrics::inc_evictions();
        info!(
            connection = %handle.id(),
            device = ?handle.device(),
            "connection evicted for inactivity"
        );
    }
    if !evicted.is_empty() {
        debug!(
            evicted = evicted.len(),
            remaining = registry.connection_count(),
            "idle sweep finished"
        );
    }
}
