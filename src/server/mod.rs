//! Tokio-based device hub.
//!
//! `DeviceHub` accepts TCP connections from device controllers, runs one
//! read loop per connection, binds each connection to the device id its
//! first message declares, and hands every decoded message to the
//! [`HandlerTable`]. A background sweep evicts connections that stay silent
//! longer than the idle timeout.

use std::{sync::Arc, time::Duration};

use tokio::{net::TcpListener, sync::oneshot};

use crate::{codec::MessageCodec, dispatch::HandlerTable, registry::DeviceRegistry};

/// Device hub parameterized by its binding typestate.
///
/// New hubs start [`Unbound`] and must call [`DeviceHub::bind`] or
/// [`DeviceHub::bind_existing_listener`] before they can run. Handlers and
/// the registry are shared, so they may be populated before or after the hub
/// starts.
pub struct DeviceHub<S = Unbound>
where
    S: ServerState,
{
    pub(crate) codec: Arc<dyn MessageCodec>,
    pub(crate) dispatcher: Arc<HandlerTable>,
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) idle_timeout: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) max_frame_length: Option<usize>,
    pub(crate) backoff_config: BackoffConfig,
    /// Fired once the accept loop and sweep have been spawned.
    ///
    /// A `oneshot::Sender` is single use; supply a fresh one per run.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: S,
}

/// Marker indicating the hub has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the hub is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

mod config;
mod connection;
pub mod error;
mod runtime;
mod sweep;

pub use config::binding;
pub use error::ServerError;
pub use runtime::BackoffConfig;

#[cfg(test)]
pub(crate) mod test_util;
