//! Outbound command delivery.
//!
//! [`CommandSender`] encodes a [`Command`] with the hub's codec and writes it
//! to the connection bound to a device id. Any number of controllers may hold
//! a sender; writes to one connection are serialized by its writer lock.

use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use crate::{
    codec::{EncodeError, MessageCodec},
    error::ConnectionFault,
    message::{Command, DeviceId},
    metrics::{self, Direction},
    registry::{DeviceNotConnected, DeviceRegistry},
};

/// Errors returned by [`CommandSender::try_send`].
#[derive(Debug, Error)]
pub enum SendError {
    /// No live connection is bound to the device.
    #[error(transparent)]
    DeviceNotConnected(#[from] DeviceNotConnected),
    /// The codec could not represent the command.
    #[error("failed to encode command: {0}")]
    Encode(#[from] EncodeError),
    /// Writing to the socket failed; the connection has been torn down.
    #[error(transparent)]
    WriteFailed(ConnectionFault),
}

/// Cloneable handle for sending commands to connected devices.
#[derive(Clone)]
pub struct CommandSender {
    registry: Arc<DeviceRegistry>,
    codec: Arc<dyn MessageCodec>,
}

impl CommandSender {
    /// Create a sender over `registry` that encodes with `codec`.
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>, codec: Arc<dyn MessageCodec>) -> Self {
        Self { registry, codec }
    }

    /// Registry this sender resolves devices against.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> { &self.registry }

    /// Encode `command` and write it to the connection bound to `device`.
    ///
    /// A failed write removes the connection from the registry and cancels
    /// it, so later sends report [`SendError::DeviceNotConnected`] until the
    /// device reconnects.
    ///
    /// # Errors
    ///
    /// See [`SendError`].
    pub async fn try_send(&self, device: &DeviceId, command: &Command) -> Result<(), SendError> {
        let connection = self.registry.resolve(device)?;
        let frame = self.codec.serialize(device, command)?;
        if let Err(e) = connection.write_frame(&frame).await {
            self.registry.remove(&connection);
            connection.close();
            return Err(SendError::WriteFailed(ConnectionFault::WriteFailed(e)));
        }
        metrics::inc_frames(Direction::Outbound);
        debug!(
            "command sent: device={device}, connection={}, command={}",
            connection.id(),
            command.name
        );
        Ok(())
    }

    /// Send `command` to `device`, logging any failure.
    ///
    /// Returns `true` when the frame was written.
    pub async fn send(&self, device: &DeviceId, command: &Command) -> bool {
        match self.try_send(device, command).await {
            Ok(()) => true,
            Err(e) => {
                metrics::inc_send_failures();
                warn!(
                    "command not delivered: device={device}, command={}, error={e}",
                    command.name
                );
                false
            }
        }
    }

    /// Send `command` to every bound device.
    ///
    /// Returns the number of devices the frame reached.
    pub async fn broadcast(&self, command: &Command) -> usize {
        let mut delivered = 0;
        for device in self.registry.connected_devices() {
            if self.send(&device, command).await {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader, duplex};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        codec::{CompactCodec, JsonCodec},
        message::{Message, MessageKind},
        registry::{ConnectionHandle, ConnectionId},
    };

    #[fixture]
    fn registry() -> Arc<DeviceRegistry> { Arc::new(DeviceRegistry::new()) }

    fn bind<W>(registry: &DeviceRegistry, id: u64, device: &str, writer: W) -> ConnectionHandle
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let conn = ConnectionHandle::new(
            ConnectionId::new(id),
            None,
            writer,
            CancellationToken::new(),
        );
        registry.insert(conn.clone());
        registry.bind_first_message(&conn, &Message::new(device, MessageKind::Event));
        conn
    }

    #[rstest]
    #[tokio::test]
    async fn send_to_absent_device_returns_false(registry: Arc<DeviceRegistry>) {
        let sender = CommandSender::new(registry, Arc::new(JsonCodec));
        let cmd = Command::new("door").with_action("open");
        assert!(!sender.send(&DeviceId::from("gt"), &cmd).await);
    }

    #[rstest]
    #[tokio::test]
    async fn try_send_reports_missing_device(registry: Arc<DeviceRegistry>) {
        let sender = CommandSender::new(registry, Arc::new(JsonCodec));
        let err = sender
            .try_send(&DeviceId::from("gt"), &Command::new("door"))
            .await
            .expect_err("device is absent");
        assert!(matches!(err, SendError::DeviceNotConnected(_)));
    }

    #[rstest]
    #[tokio::test]
    async fn json_command_reaches_bound_device(registry: Arc<DeviceRegistry>) {
        let (client, server) = duplex(256);
        bind(&registry, 1, "gt", server);
        let sender = CommandSender::new(Arc::clone(&registry), Arc::new(JsonCodec));

        let cmd = Command::new("door").with_action("open");
        assert!(sender.send(&DeviceId::from("gt"), &cmd).await);

        let mut line = String::new();
        BufReader::new(client)
            .read_line(&mut line)
            .await
            .expect("read command");
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).expect("json");
        assert_eq!(
            value,
            json!({"dev": "gt", "tp": "cmd", "cmd": "door", "act": "open"})
        );
    }

    #[rstest]
    #[tokio::test]
    async fn encode_failure_keeps_connection(registry: Arc<DeviceRegistry>) {
        let (_client, server) = duplex(64);
        let conn = bind(&registry, 1, "H", server);
        let sender = CommandSender::new(Arc::clone(&registry), Arc::new(CompactCodec::default()));

        let cmd = Command::new("fan").with_action("set");
        let err = sender
            .try_send(&DeviceId::from("H"), &cmd)
            .await
            .expect_err("compact cannot carry an action");
        assert!(matches!(err, SendError::Encode(_)));
        assert!(!conn.is_closed());
        assert!(registry.is_connected(&DeviceId::from("H")));
    }

    #[rstest]
    #[tokio::test]
    async fn write_failure_tears_connection_down(registry: Arc<DeviceRegistry>) {
        let (client, server) = duplex(64);
        let conn = bind(&registry, 1, "sr", server);
        drop(client);
        let sender = CommandSender::new(Arc::clone(&registry), Arc::new(JsonCodec));

        let err = sender
            .try_send(&DeviceId::from("sr"), &Command::new("divert"))
            .await
            .expect_err("peer is gone");
        assert!(matches!(
            err,
            SendError::WriteFailed(ConnectionFault::WriteFailed(_))
        ));
        assert!(conn.is_closed());
        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.is_connected(&DeviceId::from("sr")));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn successful_send_refreshes_activity(registry: Arc<DeviceRegistry>) {
        let (_client, server) = duplex(256);
        let conn = bind(&registry, 1, "gt", server);
        let sender = CommandSender::new(Arc::clone(&registry), Arc::new(JsonCodec));

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(sender.send(&DeviceId::from("gt"), &Command::new("door")).await);
        assert!(conn.idle_for(tokio::time::Instant::now()) < Duration::from_secs(1));
    }

    #[rstest]
    #[tokio::test]
    async fn broadcast_counts_delivered_devices(registry: Arc<DeviceRegistry>) {
        let (_a, server_a) = duplex(256);
        let (_b, server_b) = duplex(256);
        let (dead, server_c) = duplex(256);
        bind(&registry, 1, "gt", server_a);
        bind(&registry, 2, "sr", server_b);
        bind(&registry, 3, "hs_ab", server_c);
        drop(dead);
        let sender = CommandSender::new(Arc::clone(&registry), Arc::new(JsonCodec));

        let delivered = sender.broadcast(&Command::new("status")).await;
        assert_eq!(delivered, 2);
        assert_eq!(registry.connected_devices().len(), 2);
    }
}
