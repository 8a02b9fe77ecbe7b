//! Builder configuration for [`DeviceHub`].

use std::{sync::Arc, time::Duration};

use tokio::sync::oneshot;

use super::{BackoffConfig, DeviceHub, ServerState, Unbound};
use crate::{
    codec::MessageCodec,
    dispatch::HandlerTable,
    frame::DEFAULT_MAX_FRAME_LENGTH,
    registry::DeviceRegistry,
    sender::CommandSender,
};

pub mod binding;


/// Default inactivity limit before a connection is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Default period of the idle sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

impl DeviceHub<Unbound> {
    /// Create a hub that speaks `codec`.
    ///
    /// The hub starts with an empty handler table and registry, a 300 s idle
    /// timeout swept every 60 s, and a 64 KiB frame limit. Call
    /// [`bind`](Self::bind) before running it.
    #[must_use]
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            codec,
            dispatcher: Arc::new(HandlerTable::new()),
            registry: Arc::new(DeviceRegistry::new()),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_frame_length: Some(DEFAULT_MAX_FRAME_LENGTH),
            backoff_config: BackoffConfig::default(),
            ready_tx: None,
            state: Unbound,
        }
    }
}

impl<S> DeviceHub<S>
where
    S: ServerState,
{
    /// Use a shared handler table.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<HandlerTable>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Use a shared device registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<DeviceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Evict connections silent for longer than `timeout`.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Run the idle sweep every `interval`. Zero is raised to one millisecond.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Limit buffered frames to `limit` bytes; `None` removes the limit.
    #[must_use]
    pub fn max_frame_length(mut self, limit: Option<usize>) -> Self {
        self.max_frame_length = limit;
        self
    }

    /// Configure accept-loop back-off.
    #[must_use]
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff_config = config.normalized();
        self
    }

    /// Configure a channel used to signal when the hub is ready to accept connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Handler table messages are dispatched to.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<HandlerTable> { &self.dispatcher }

    /// Registry of live connections.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> { &self.registry }

    /// Codec used for every connection.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn MessageCodec> { &self.codec }

    /// Sender that writes commands through this hub's registry and codec.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        CommandSender::new(Arc::clone(&self.registry), Arc::clone(&self.codec))
    }
}
