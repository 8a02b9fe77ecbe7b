//! Routing of decoded messages to registered handlers.
//!
//! Handlers are keyed by `(DeviceSelector, MessageKind)`. A lookup tries the
//! aliased device name, then the announced id, then the wildcard selector.
//! Device aliases let a controller register under a stable name
//! (`sort_controller`) while the hardware announces a short id (`sr`).
//!
//! Dispatch never fails the caller: a missing handler is logged, and a handler
//! that returns an error or panics is logged and counted. The connection that
//! delivered the message keeps running either way.

use std::{
    error::Error,
    fmt,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
};

use dashmap::DashMap;
use futures::{Future, FutureExt};
use tracing::{debug, error, warn};

use crate::{
    message::{DeviceId, Message, MessageKind},
    metrics,
    panic::PanicPayload,
};

/// Error type returned by handlers.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Future returned by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Type-erased asynchronous message handler.
pub type Handler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

/// Devices a handler applies to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    /// One device id (after alias resolution).
    Exact(DeviceId),
    /// Any device without a more specific registration.
    Any,
}

impl From<DeviceId> for DeviceSelector {
    fn from(value: DeviceId) -> Self { Self::Exact(value) }
}

impl From<&str> for DeviceSelector {
    fn from(value: &str) -> Self {
        if value == "*" {
            Self::Any
        } else {
            Self::Exact(DeviceId::from(value))
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(id) => id.fmt(f),
            Self::Any => f.write_str("*"),
        }
    }
}

/// Result of dispatching one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion.
    Handled,
    /// No handler matched the device and kind.
    Unhandled,
    /// The handler returned an error or panicked.
    Failed,
}

/// Concurrent table of handlers and device aliases.
#[derive(Default)]
pub struct HandlerTable {
    handlers: DashMap<(DeviceSelector, MessageKind), Handler>,
    aliases: DashMap<DeviceId, DeviceId>,
}

impl HandlerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register an async closure for `(selector, kind)`.
    ///
    /// Returns the handler it replaced, if any.
    ///
    /// ```
    /// use hubwire::{dispatch::HandlerTable, message::MessageKind};
    ///
    /// let table = HandlerTable::new();
    /// let previous = table.register("sr", MessageKind::Event, |msg| async move {
    ///     log::info!("barcode from {}", msg.device);
    ///     Ok::<(), hubwire::dispatch::HandlerError>(())
    /// });
    /// assert!(previous.is_none());
    /// ```
    pub fn register<S, F, Fut>(
        &self,
        selector: S,
        kind: MessageKind,
        handler: F,
    ) -> Option<Handler>
    where
        S: Into<DeviceSelector>,
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |message| Box::pin(handler(message)));
        self.register_handler(selector, kind, handler)
    }

    /// Register an already type-erased handler.
    pub fn register_handler<S>(
        &self,
        selector: S,
        kind: MessageKind,
        handler: Handler,
    ) -> Option<Handler>
    where
        S: Into<DeviceSelector>,
    {
        let selector = selector.into();
        debug!(device = %selector, %kind, "handler registered");
        let previous = self.handlers.insert((selector.clone(), kind), handler);
        if previous.is_some() {
            warn!(device = %selector, %kind, "handler replaced");
        }
        previous
    }

    /// Remove the handler for `(selector, kind)`.
    pub fn unregister<S>(&self, selector: S, kind: MessageKind) -> Option<Handler>
    where
        S: Into<DeviceSelector>,
    {
        self.handlers
            .remove(&(selector.into(), kind))
            .map(|(_, handler)| handler)
    }

    /// Route messages from device `from` to handlers registered for `to`.
    pub fn alias(&self, from: impl Into<DeviceId>, to: impl Into<DeviceId>) {
        self.aliases.insert(from.into(), to.into());
    }

    /// Resolve `device` through the alias table.
    #[must_use]
    pub fn canonical(&self, device: &DeviceId) -> DeviceId {
        self.aliases
            .get(device)
            .map_or_else(|| device.clone(), |entry| entry.value().clone())
    }

    /// Whether a handler would receive a `kind` message from `device`.
    #[must_use]
    pub fn has_handler(&self, device: &DeviceId, kind: MessageKind) -> bool {
        self.lookup(device, kind).is_some()
    }

    /// Canonical name first, then the announced id, then the wildcard.
    fn lookup(&self, device: &DeviceId, kind: MessageKind) -> Option<Handler> {
        let canonical = self.canonical(device);
        let mut selectors = vec![DeviceSelector::Exact(canonical.clone())];
        if canonical != *device {
            selectors.push(DeviceSelector::Exact(device.clone()));
        }
        selectors.push(DeviceSelector::Any);
        selectors.into_iter().find_map(|selector| {
            self.handlers
                .get(&(selector, kind))
                .map(|entry| Arc::clone(entry.value()))
        })
    }

    /// Deliver `message` to its handler.
    ///
    /// Errors and panics raised by the handler are contained here.
    pub async fn dispatch(&self, message: Message) -> DispatchOutcome {
        let device = message.device.clone();
        let kind = message.kind;
        let Some(handler) = self.lookup(&device, kind) else {
            warn!(
                %device,
                canonical = %self.canonical(&device),
                %kind,
                "no handler registered"
            );
            return DispatchOutcome::Unhandled;
        };

        let call = async move { handler(message).await };
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(e)) => {
                metrics::inc_dispatch_failures();
                error!(%device, %kind, error = %e, "handler failed");
                DispatchOutcome::Failed
            }
            Err(panic) => {
                metrics::inc_dispatch_failures();
                let panic_msg = PanicPayload(panic.as_ref());
                error!(%device, %kind, panic = %panic_msg, "handler panicked");
                DispatchOutcome::Failed
            }
        }
    }
}
