//! Per-connection read loop for [`DeviceHub`](super::DeviceHub).

use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
    select,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    codec::MessageCodec,
    dispatch::HandlerTable,
    error::ConnectionFault,
    frame::FrameReader,
    metrics::{self, Direction},
    panic::PanicPayload,
    registry::{ConnectionHandle, ConnectionId, DeviceRegistry},
};

const READ_CHUNK: usize = 4096;

/// Shared state every connection task needs.
pub(in crate::server) struct ConnectionContext {
    pub codec: Arc<dyn MessageCodec>,
    pub dispatcher: Arc<HandlerTable>,
    pub registry: Arc<DeviceRegistry>,
    pub max_frame_length: Option<usize>,
}

/// Register `stream` and spawn its read loop, logging and discarding any panics.
///
/// The connection token is a child of `shutdown`, so cancelling the hub
/// closes every connection.
pub(in crate::server) fn spawn_connection_task(
    stream: TcpStream,
    id: ConnectionId,
    context: &Arc<ConnectionContext>,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!(error = %e, "failed to retrieve peer address");
            None
        }
    };
    let (reader, writer) = stream.into_split();
    let handle = ConnectionHandle::new(id, peer_addr, writer, shutdown.child_token());
    context.registry.insert(handle.clone());
    metrics::inc_connections();
    debug!(connection = %id, ?peer_addr, "connection accepted");

    let context = Arc::clone(context);
    tracker.spawn(async move {
        let outcome = AssertUnwindSafe(read_loop(reader, &handle, &context))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => debug!(connection = %id, device = ?handle.device(), "connection closed"),
            Ok(Err(fault)) => log_fault(&handle, peer_addr, &fault),
            Err(panic) => {
                let panic_msg = PanicPayload(panic.as_ref());
                error!(connection = %id, panic = %panic_msg, ?peer_addr, "connection task panicked");
            }
        }
        teardown(&handle, &context.registry).await;
    });
}

fn log_fault(handle: &ConnectionHandle, peer_addr: Option<SocketAddr>, fault: &ConnectionFault) {
    if fault.is_clean_close() {
        info!(
            connection = %handle.id(),
            device = ?handle.device(),
            ?peer_addr,
            "peer closed connection"
        );
    } else {
        warn!(
            connection = %handle.id(),
            device = ?handle.device(),
            ?peer_addr,
            error = %fault,
            "connection fault"
        );
    }
}

async fn teardown(handle: &ConnectionHandle, registry: &DeviceRegistry) {
    registry.remove(handle);
    handle.close();
    handle.shutdown_writer().await;
    metrics::dec_connections();
}

/// Read until the peer closes, the socket fails, or the token is cancelled.
///
/// Returns `Ok(())` when the connection was closed from this side (eviction,
/// rebinding, or hub shutdown).
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn read_loop<R>(
    mut reader: R,
    handle: &ConnectionHandle,
    context: &ConnectionContext,
) -> Result<(), ConnectionFault>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new(context.max_frame_length);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = select! {
            biased;

            () = handle.token().cancelled() => return Ok(()),
            res = reader.read(&mut chunk) => res.map_err(ConnectionFault::ReadFailed)?,
        };
        if read == 0 {
            let discarded = frames.finish();
            if discarded > 0 {
                debug!(connection = %handle.id(), bytes = discarded, "discarding partial frame at EOF");
            }
            return Err(ConnectionFault::PeerClosed);
        }
        handle.touch();

        let Some(bytes) = chunk.get(..read) else {
            continue;
        };
        for frame in frames.feed(bytes) {
            match frame {
                Ok(frame) => {
                    if !process_frame(&frame, handle, context).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    metrics::inc_decode_errors();
                    warn!(connection = %handle.id(), error = %e, "dropping frame");
                }
            }
        }
    }
}

/// Decode, bind and dispatch one frame.
///
/// Returns `false` if the connection was cancelled while a handler was still
/// running; the handler future is dropped.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn process_frame(
    frame: &[u8],
    handle: &ConnectionHandle,
    context: &ConnectionContext,
) -> bool {
    let message = match context.codec.parse(frame) {
        Ok(message) => message,
        Err(e) => {
            metrics::inc_decode_errors();
            warn!(
                connection = %handle.id(),
                codec = context.codec.name(),
                error = %e,
                frame_len = frame.len(),
                "failed to decode frame"
            );
            return true;
        }
    };
    metrics::inc_frames(Direction::Inbound);
    context.registry.bind_first_message(handle, &message);
    select! {
        biased;

        () = handle.token().cancelled() => {
            warn!(connection = %handle.id(), device = ?handle.device(), "handler abandoned on close");
            false
        }
        _ = context.dispatcher.dispatch(message) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};
    use tokio::io::{AsyncWriteExt, duplex};
    use tracing::Instrument;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        codec::JsonCodec,
        dispatch::HandlerError,
        message::{DeviceId, Message, MessageKind},
    };

    #[fixture]
    fn context() -> ConnectionContext {
        ConnectionContext {
            codec: Arc::new(JsonCodec),
            dispatcher: Arc::new(HandlerTable::new()),
            registry: Arc::new(DeviceRegistry::new()),
            max_frame_length: Some(64),
        }
    }

    fn handle(id: u64) -> ConnectionHandle {
        ConnectionHandle::new(
            ConnectionId::new(id),
            None,
            tokio::io::sink(),
            CancellationToken::new(),
        )
    }

    fn record(
        table: &HandlerTable,
        device: &str,
        kind: MessageKind,
    ) -> Arc<std::sync::Mutex<Vec<Message>>> {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        table.register(device, kind, move |msg: Message| {
            let log = Arc::clone(&log);
            async move {
                log.lock().expect("lock").push(msg);
                Ok::<(), HandlerError>(())
            }
        });
        seen
    }

    #[rstest]
    #[tokio::test]
    async fn chunked_frames_bind_and_dispatch_in_order(context: ConnectionContext) {
        let seen = record(&context.dispatcher, "sr", MessageKind::Event);
        let conn = handle(1);
        context.registry.insert(conn.clone());

        let (mut client, server) = duplex(256);
        client
            .write_all(b"{\"dev\":\"sr\",\"tp\":\"evt\",\"evt\":\"bar")
            .await
            .expect("write");
        client
            .write_all(b"code\",\"val\":{\"c\":\"A\"}}\n{\"dev\":\"sr\",\"tp\":\"evt\",\"evt\":\"arrived\"}\n")
            .await
            .expect("write");
        drop(client);

        let result = read_loop(server, &conn, &context).await;
        assert!(matches!(result, Err(ConnectionFault::PeerClosed)));
        assert_eq!(conn.device().map(DeviceId::as_str), Some("sr"));

        let names: Vec<Option<String>> = seen
            .lock()
            .expect("lock")
            .iter()
            .map(|m| m.name.clone())
            .collect();
        assert_eq!(
            names,
            vec![Some("barcode".to_owned()), Some("arrived".to_owned())]
        );
    }

    #[rstest]
    #[traced_test]
    #[tokio::test]
    async fn malformed_and_oversized_frames_are_dropped(context: ConnectionContext) {
        let seen = record(&context.dispatcher, "gt", MessageKind::Response);
        let conn = handle(1);

        let (mut client, server) = duplex(512);
        let oversized = vec![b'x'; 100];
        client.write_all(&oversized).await.expect("write");
        client.write_all(b"\nnot json\n").await.expect("write");
        client
            .write_all(b"{\"dev\":\"gt\",\"tp\":\"res\",\"res\":\"door\"}\n")
            .await
            .expect("write");
        drop(client);

        let result = read_loop(server, &conn, &context).await;
        assert!(matches!(result, Err(ConnectionFault::PeerClosed)));
        assert_eq!(seen.lock().expect("lock").len(), 1);
        assert!(logs_contain("dropping frame"));
        assert!(logs_contain("failed to decode frame"));
    }

    #[rstest]
    #[tokio::test]
    async fn cancellation_ends_loop_cleanly(context: ConnectionContext) {
        let conn = handle(1);
        let (_client, server) = duplex(64);
        let token = conn.token().clone();
        let task = {
            let conn = conn.clone();
            tokio::spawn(async move { read_loop(server, &conn, &context).await })
        };
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop stops")
            .expect("join");
        assert!(result.is_ok());
    }

    #[rstest]
    #[traced_test]
    #[tokio::test]
    async fn cancellation_abandons_stuck_handler(context: ConnectionContext) {
        context
            .dispatcher
            .register("hs_ab", MessageKind::Event, |_msg: Message| async move {
                futures::future::pending::<()>().await;
                Ok::<(), HandlerError>(())
            });
        let conn = handle(1);
        let (mut client, server) = duplex(256);
        client
            .write_all(b"{\"dev\":\"hs_ab\",\"tp\":\"evt\",\"evt\":\"tp\"}\n")
            .await
            .expect("write");
        let token = conn.token().clone();
        let task = {
            let conn = conn.clone();
            tokio::spawn(
                async move { read_loop(server, &conn, &context).await }.in_current_span(),
            )
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop stops despite pending handler")
            .expect("join");
        assert!(result.is_ok());
        assert!(logs_contain("handler abandoned on close"));
        drop(client);
    }

    #[rstest]
    #[tokio::test]
    async fn partial_tail_at_eof_is_not_dispatched(context: ConnectionContext) {
        let seen = record(&context.dispatcher, "sr", MessageKind::Event);
        let conn = handle(1);
        let (mut client, server) = duplex(64);
        client
            .write_all(b"{\"dev\":\"sr\",\"tp\":\"evt\"}")
            .await
            .expect("write");
        drop(client);

        let result = read_loop(server, &conn, &context).await;
        assert!(matches!(result, Err(ConnectionFault::PeerClosed)));
        assert!(seen.lock().expect("lock").is_empty());
        assert!(conn.device().is_none());
    }
}
