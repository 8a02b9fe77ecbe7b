//! Registry of live device connections.
//!
//! `DeviceRegistry` holds every accepted connection keyed by
//! [`ConnectionId`], plus the mapping from a declared [`DeviceId`] to the
//! connection currently speaking for it. A connection is bound to a device id
//! by its first decoded message and keeps that id for its lifetime.
//!
//! When a second connection claims an id that is already bound, the newer
//! connection wins: the mapping moves to it and the older connection is
//! cancelled so its task tears it down. A reconnecting controller therefore
//! never leaves a half-open predecessor reachable by id.

use std::{
    fmt,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::message::{DeviceId, Message};

/// Identifier assigned to a connection on accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "conn-{}", self.0) }
}

/// Returned when a device id has no live connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("device {0} is not connected")]
pub struct DeviceNotConnected(pub DeviceId);

/// Monotonic record of the last read or write on a connection.
///
/// Stored as a millisecond offset from creation so it can be updated through
/// a shared reference.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    /// Start a clock whose last activity is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record activity at the current instant.
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since the last recorded activity, measured at `now`.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last = self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        now.saturating_duration_since(last)
    }
}

impl Default for ActivityClock {
    fn default() -> Self { Self::new() }
}

type DeviceWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct ConnectionInner {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    writer: Mutex<DeviceWriter>,
    activity: ActivityClock,
    token: CancellationToken,
    device: OnceLock<DeviceId>,
}

/// Shared handle to a live connection.
///
/// The handle owns the write half; the read half stays with the connection
/// task. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionHandle(Arc<ConnectionInner>);

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.0.id)
            .field("peer_addr", &self.0.peer_addr)
            .field("device", &self.0.device.get())
            .field("closed", &self.0.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Wrap the write half of a connection.
    ///
    /// `token` is cancelled to tear the connection down.
    pub fn new<W>(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        writer: W,
        token: CancellationToken,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self(Arc::new(ConnectionInner {
            id,
            peer_addr,
            writer: Mutex::new(Box::new(writer)),
            activity: ActivityClock::new(),
            token,
            device: OnceLock::new(),
        }))
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.0.id }

    /// Remote address, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.0.peer_addr }

    /// Device id bound by the first message, if any.
    #[must_use]
    pub fn device(&self) -> Option<&DeviceId> { self.0.device.get() }

    /// Record activity now.
    pub fn touch(&self) { self.0.activity.touch(); }

    /// Time since the last read or successful write.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration { self.0.activity.idle_for(now) }

    /// Token observed by the connection task.
    #[must_use]
    pub fn token(&self) -> &CancellationToken { &self.0.token }

    /// Ask the connection task to close the connection.
    pub fn close(&self) { self.0.token.cancel(); }

    /// Whether the connection has been asked to close.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.0.token.is_cancelled() }

    /// Write one encoded frame and flush it.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotConnected`] if the connection is closing,
    /// or the underlying write error.
    pub async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            ));
        }
        let mut writer = self.0.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        drop(writer);
        self.touch();
        Ok(())
    }

    /// Shut down the write half, ignoring errors from an already dead socket.
    pub(crate) async fn shutdown_writer(&self) {
        let mut writer = self.0.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("writer shutdown failed: connection={}, error={e}", self.0.id);
        }
    }

    fn bind_device(&self, device: &DeviceId) -> &DeviceId { self.0.device.get_or_init(|| device.clone()) }
}

/// Concurrent registry of connections and device bindings.
#[derive(Default)]
pub struct DeviceRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    devices: DashMap<DeviceId, ConnectionHandle>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Track a newly accepted connection.
    pub fn insert(&self, connection: ConnectionHandle) {
        self.connections.insert(connection.id(), connection);
    }

    /// Look up a connection by id.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every tracked connection.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn connection_count(&self) -> usize { self.connections.len() }

    /// Bind `connection` to the device named by `message` if it is unbound.
    ///
    /// Returns the id the connection is bound to, which never changes after
    /// the first call. If another connection held the id, the mapping moves
    /// to `connection` and the previous holder is closed.
    pub fn bind_first_message(&self, connection: &ConnectionHandle, message: &Message) -> DeviceId {
        if let Some(bound) = connection.device() {
            if *bound != message.device {
                debug!(
                    "ignoring device id change: connection={}, bound={bound}, declared={}",
                    connection.id(),
                    message.device
                );
            }
            return bound.clone();
        }

        let device = connection.bind_device(&message.device).clone();
        if connection.is_closed() {
            return device;
        }
        match self.devices.insert(device.clone(), connection.clone()) {
            Some(previous) if previous.id() != connection.id() => {
                warn!(
                    "device rebound, closing previous connection: device={device}, \
                     previous={}, current={}",
                    previous.id(),
                    connection.id()
                );
                previous.close();
            }
            _ => info!(
                "device bound: device={device}, connection={}, peer_addr={:?}",
                connection.id(),
                connection.peer_addr()
            ),
        }
        device
    }

    /// Find the live connection bound to `device`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceNotConnected`] if no open connection is bound to it.
    pub fn resolve(&self, device: &DeviceId) -> Result<ConnectionHandle, DeviceNotConnected> {
        let handle = self.devices.get(device).map(|entry| entry.value().clone());
        match handle {
            Some(handle) if !handle.is_closed() => Ok(handle),
            Some(_) => {
                self.devices.remove_if(device, |_, h| h.is_closed());
                Err(DeviceNotConnected(device.clone()))
            }
            None => Err(DeviceNotConnected(device.clone())),
        }
    }

    /// Remove the device mapping if it still points at `connection`.
    ///
    /// Returns `true` if a mapping was removed. A newer connection that has
    /// since claimed the same id is left untouched.
    pub fn unbind(&self, connection: &ConnectionHandle) -> bool {
        connection.device().is_some_and(|device| {
            self.devices
                .remove_if(device, |_, h| h.id() == connection.id())
                .is_some()
        })
    }

    /// Forget `connection` entirely: drop it from the table and unbind it.
    pub fn remove(&self, connection: &ConnectionHandle) {
        self.connections.remove(&connection.id());
        if self.unbind(connection)
            && let Some(device) = connection.device()
        {
            info!(
                "device disconnected: device={device}, connection={}",
                connection.id()
            );
        }
    }

    /// Remove and close the connection with `id`.
    pub fn evict(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let (_, handle) = self.connections.remove(&id)?;
        self.unbind(&handle);
        handle.close();
        Some(handle)
    }

    /// Evict every connection idle for longer than `timeout` at `now`.
    ///
    /// Returns the evicted handles.
    pub fn evict_idle(&self, now: Instant, timeout: Duration) -> Vec<ConnectionHandle> {
        let idle: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().idle_for(now) > timeout)
            .map(|entry| *entry.key())
            .collect();
        idle.into_iter()
            .filter_map(|id| {
                let handle = self.evict(id)?;
                info!(
                    "evicting idle connection: connection={id}, device={:?}, idle={:?}",
                    handle.device(),
                    handle.idle_for(now)
                );
                Some(handle)
            })
            .collect()
    }

    /// Device ids with a live connection, sorted.
    #[must_use]
    pub fn connected_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.key().clone())
            .collect();
        devices.sort();
        devices
    }

    /// Whether `device` currently has a live connection.
    #[must_use]
    pub fn is_connected(&self, device: &DeviceId) -> bool { self.resolve(device).is_ok() }

    /// Close every tracked connection.
    pub fn close_all(&self) {
        for entry in &self.connections {
            entry.value().close();
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tokio::io::{AsyncReadExt, duplex};

    use super::*;
    use crate::message::MessageKind;

    #[fixture]
    fn registry() -> DeviceRegistry { DeviceRegistry::new() }

    fn handle(id: u64) -> ConnectionHandle {
        ConnectionHandle::new(
            ConnectionId::new(id),
            None,
            tokio::io::sink(),
            CancellationToken::new(),
        )
    }

    fn event(device: &str) -> Message { Message::new(device, MessageKind::Event) }

    #[rstest]
    fn first_message_binds_device(registry: DeviceRegistry) {
        let conn = handle(1);
        registry.insert(conn.clone());
        let bound = registry.bind_first_message(&conn, &event("sr"));
        assert_eq!(bound.as_str(), "sr");
        let resolved = registry.resolve(&bound).expect("bound device resolves");
        assert_eq!(resolved.id(), conn.id());
    }

    #[rstest]
    fn binding_is_idempotent(registry: DeviceRegistry) {
        let conn = handle(1);
        registry.bind_first_message(&conn, &event("sr"));
        let second = registry.bind_first_message(&conn, &event("gt"));
        assert_eq!(second.as_str(), "sr");
        assert!(registry.resolve(&DeviceId::from("gt")).is_err());
    }

    #[rstest]
    fn rebinding_moves_mapping_and_closes_previous(registry: DeviceRegistry) {
        let old = handle(1);
        let new = handle(2);
        registry.bind_first_message(&old, &event("gt"));
        registry.bind_first_message(&new, &event("gt"));

        let resolved = registry
            .resolve(&DeviceId::from("gt"))
            .expect("device resolves");
        assert_eq!(resolved.id(), new.id());
        assert!(old.is_closed());
        assert!(!new.is_closed());
    }

    #[rstest]
    fn unbind_leaves_newer_connection(registry: DeviceRegistry) {
        let old = handle(1);
        let new = handle(2);
        registry.bind_first_message(&old, &event("gt"));
        registry.bind_first_message(&new, &event("gt"));

        assert!(!registry.unbind(&old));
        assert!(registry.is_connected(&DeviceId::from("gt")));
        assert!(registry.unbind(&new));
        assert!(!registry.is_connected(&DeviceId::from("gt")));
    }

    #[rstest]
    fn resolve_prunes_closed_connection(registry: DeviceRegistry) {
        let conn = handle(1);
        registry.bind_first_message(&conn, &event("sr"));
        conn.close();
        assert_eq!(
            registry.resolve(&DeviceId::from("sr")).map(|h| h.id()),
            Err(DeviceNotConnected(DeviceId::from("sr")))
        );
        assert!(registry.connected_devices().is_empty());
    }

    #[rstest]
    fn remove_drops_connection_and_binding(registry: DeviceRegistry) {
        let conn = handle(7);
        registry.insert(conn.clone());
        registry.bind_first_message(&conn, &event("hs_ab"));
        registry.remove(&conn);
        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.is_connected(&DeviceId::from("hs_ab")));
    }

    #[rstest]
    fn connected_devices_are_sorted(registry: DeviceRegistry) {
        for (id, device) in [(1, "sr"), (2, "gt"), (3, "hs_ab")] {
            let conn = handle(id);
            registry.insert(conn.clone());
            registry.bind_first_message(&conn, &event(device));
        }
        let devices: Vec<String> = registry
            .connected_devices()
            .into_iter()
            .map(|d| d.to_string())
            .collect();
        assert_eq!(devices, vec!["gt", "hs_ab", "sr"]);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn evict_idle_spares_active_connections(registry: DeviceRegistry) {
        let idle = handle(1);
        let active = handle(2);
        for (conn, device) in [(&idle, "sr"), (&active, "gt")] {
            registry.insert(conn.clone());
            registry.bind_first_message(conn, &event(device));
        }

        tokio::time::advance(Duration::from_secs(200)).await;
        active.touch();
        tokio::time::advance(Duration::from_secs(200)).await;

        let evicted = registry.evict_idle(Instant::now(), Duration::from_secs(300));
        let ids: Vec<ConnectionId> = evicted.iter().map(ConnectionHandle::id).collect();
        assert_eq!(ids, vec![idle.id()]);
        assert!(idle.is_closed());
        assert!(!registry.is_connected(&DeviceId::from("sr")));
        assert!(registry.is_connected(&DeviceId::from("gt")));
    }

    #[tokio::test]
    async fn write_frame_reaches_peer_and_fails_after_close() {
        let (client, server) = duplex(64);
        let conn = ConnectionHandle::new(ConnectionId::new(1), None, server, CancellationToken::new());
        conn.write_frame(b"ok\n").await.expect("write");

        let mut client = client;
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"ok\n");

        conn.close();
        let err = conn.write_frame(b"ok\n").await.expect_err("closed");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
