//! Test helpers shared across server modules.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};

use rstest::fixture;

use super::{Bound, DeviceHub, Unbound};
use crate::codec::JsonCodec;

#[fixture]
pub fn hub() -> DeviceHub<Unbound> { DeviceHub::new(Arc::new(JsonCodec)) }

#[fixture]
/// Returns a bound [`StdTcpListener`] on a free port for use in tests.
///
/// Keeping the listener bound prevents another process from claiming the
/// port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

/// Extract the bound address from a listener.
#[must_use]
pub fn listener_addr(listener: &StdTcpListener) -> SocketAddr {
    listener
        .local_addr()
        .expect("failed to get listener address")
}

pub fn bind_hub(hub: DeviceHub<Unbound>, listener: StdTcpListener) -> DeviceHub<Bound> {
    hub.bind_existing_listener(listener).expect("Failed to bind")
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
pub async fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_addr_matches_local_addr() {
        let listener = free_listener();
        assert_eq!(
            listener_addr(&listener),
            listener.local_addr().expect("failed to get address")
        );
    }

    #[test]
    fn new_hub_is_unbound() { assert!(hub().local_addr().is_none()); }
}
