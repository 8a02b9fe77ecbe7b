//! Simulated device controllers and a hub runner for integration tests.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use hubwire::{
    frame::LineCodec,
    server::{DeviceHub, ServerError, Unbound},
};
use tokio::{net::TcpStream, sync::oneshot, task::JoinHandle, time::timeout};
use tokio_util::codec::Framed;

/// Default wait for a line from the hub.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A TCP client speaking newline-delimited frames, standing in for hardware.
pub struct SimulatedDevice {
    framed: Framed<TcpStream, LineCodec>,
}

impl SimulatedDevice {
    /// Connect to a hub at `addr`.
    ///
    /// # Errors
    ///
    /// Returns any connection error.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, LineCodec::new(None)),
        })
    }

    /// Send one frame; the delimiter is appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame contains a newline or the write fails.
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.framed.send(Bytes::copy_from_slice(line.as_bytes())).await
    }

    /// Write raw bytes without framing, for split and malformed input.
    ///
    /// # Errors
    ///
    /// Returns any write error.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let stream = self.framed.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await
    }

    /// Receive the next frame as text, waiting at most [`RECV_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::TimedOut`] if nothing arrives,
    /// [`io::ErrorKind::UnexpectedEof`] if the hub closed the connection, or
    /// [`io::ErrorKind::InvalidData`] for non-UTF-8 frames.
    pub async fn recv_line(&mut self) -> io::Result<String> {
        let frame = timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no frame from hub"))?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "hub closed connection"))??;
        String::from_utf8(frame.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Wait until the hub closes this connection.
    ///
    /// Returns `true` if the connection reached EOF within `limit`.
    pub async fn closed_within(&mut self, limit: Duration) -> bool {
        matches!(
            timeout(limit, async {
                loop {
                    match self.framed.next().await {
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    }
                }
            })
            .await,
            Ok(())
        )
    }
}

/// A hub running on a background task.
pub struct RunningHub {
    /// Address the hub listens on.
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl RunningHub {
    /// Signal shutdown and wait for the hub to stop.
    ///
    /// # Errors
    ///
    /// Returns the hub's error, if any.
    ///
    /// # Panics
    ///
    /// Panics if the hub task panicked.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.expect("hub task panicked")
    }
}

/// Bind `hub` to an ephemeral localhost port and run it until shut down.
///
/// Returns once the hub signals readiness.
///
/// # Errors
///
/// Returns a bind error.
///
/// # Panics
///
/// Panics if the bound address cannot be read or the hub never becomes ready.
pub async fn spawn_hub(hub: DeviceHub<Unbound>) -> Result<RunningHub, ServerError> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let hub = hub
        .ready_signal(ready_tx)
        .bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
    let addr = hub.local_addr().expect("bound hub has an address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(hub.run_with_shutdown(async {
        let _ = shutdown_rx.await;
    }));
    ready_rx.await.expect("hub did not signal readiness");
    Ok(RunningHub {
        addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}
