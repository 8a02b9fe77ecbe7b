//! Runtime control for [`DeviceHub`].

mod accept;
mod backoff;
#[cfg(test)]
mod tests;

use std::sync::Arc;

#[cfg(test)]
pub(super) use accept::MockAcceptListener;
pub(super) use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    Bound,
    DeviceHub,
    ServerError,
    connection::ConnectionContext,
    sweep::{SweepOptions, sweep_loop},
};

impl DeviceHub<Bound> {
    /// Run the hub until Ctrl+C is received.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use hubwire::{codec::JsonCodec, server::DeviceHub};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), hubwire::server::ServerError> {
    /// let hub = DeviceHub::new(Arc::new(JsonCodec)).bind(([0, 0, 0, 0], 9000).into())?;
    /// hub.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// Attempting to run an unbound hub fails to compile:
    ///
    /// ```compile_fail
    /// use std::sync::Arc;
    ///
    /// use hubwire::{codec::JsonCodec, server::DeviceHub};
    ///
    /// async fn try_run() {
    ///     DeviceHub::new(Arc::new(JsonCodec))
    ///         .run()
    ///         .await
    ///         .expect("unbound hubs do not expose run()");
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors; the `Result` is reserved for runtime setup.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the hub until `shutdown` resolves.
    ///
    /// On shutdown the accept loop and idle sweep stop, every connection is
    /// closed, and this returns once all connection tasks have finished.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use hubwire::{codec::JsonCodec, server::DeviceHub};
    /// use tokio::sync::oneshot;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), hubwire::server::ServerError> {
    /// let hub = DeviceHub::new(Arc::new(JsonCodec)).bind(([127, 0, 0, 1], 0).into())?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(async move {
    ///     hub.run_with_shutdown(async {
    ///         let _ = rx.await;
    ///     })
    ///     .await
    /// });
    ///
    /// let _ = tx.send(());
    /// handle.await.expect("join hub task").expect("hub run failed");
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let DeviceHub {
            codec,
            dispatcher,
            registry,
            idle_timeout,
            sweep_interval,
            max_frame_length,
            backoff_config,
            ready_tx,
            state: Bound { listener },
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let context = Arc::new(ConnectionContext {
            codec,
            dispatcher,
            registry: Arc::clone(&registry),
            max_frame_length,
        });

        info!(
            "device hub listening: local_addr={:?}, codec={}",
            listener.local_addr().ok(),
            context.codec.name()
        );
        tracker.spawn(accept_loop(
            listener,
            AcceptLoopOptions {
                context,
                shutdown: shutdown_token.clone(),
                tracker: tracker.clone(),
                backoff: backoff_config,
            },
        ));
        tracker.spawn(sweep_loop(
            Arc::clone(&registry),
            SweepOptions {
                interval: sweep_interval,
                idle_timeout,
            },
            shutdown_token.clone(),
        ));

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        registry.close_all();
        tracker.close();
        tracker.wait().await;
        info!("device hub stopped");
        Ok(())
    }
}
