//! Listener binding for [`DeviceHub`].

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::net::TcpListener;

use crate::server::{Bound, DeviceHub, ServerError, ServerState, Unbound};

impl<S> DeviceHub<S>
where
    S: ServerState,
{
    fn bind_to_listener(self, std_listener: StdTcpListener) -> Result<DeviceHub<Bound>, ServerError> {
        let DeviceHub {
            codec,
            dispatcher,
            registry,
            idle_timeout,
            sweep_interval,
            max_frame_length,
            backoff_config,
            ready_tx,
            ..
        } = self;

        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let tokio_listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;

        Ok(DeviceHub {
            codec,
            dispatcher,
            registry,
            idle_timeout,
            sweep_interval,
            max_frame_length,
            backoff_config,
            ready_tx,
            state: Bound {
                listener: Arc::new(tokio_listener),
            },
        })
    }
}

impl DeviceHub<Unbound> {
    /// Return `None` as the hub is not bound.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use hubwire::{codec::JsonCodec, server::DeviceHub};
    ///
    /// assert!(DeviceHub::new(Arc::new(JsonCodec)).local_addr().is_none());
    /// ```
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }

    /// Bind to a fresh address.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::{
    ///     net::{Ipv4Addr, SocketAddr},
    ///     sync::Arc,
    /// };
    ///
    /// use hubwire::{codec::JsonCodec, server::DeviceHub};
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    /// let hub = DeviceHub::new(Arc::new(JsonCodec))
    ///     .bind(addr)
    ///     .expect("bind failed");
    /// assert!(hub.local_addr().is_some());
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns a [`ServerError`] if binding or configuring the listener fails.
    pub fn bind(self, addr: SocketAddr) -> Result<DeviceHub<Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Bind to an existing `StdTcpListener`.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if configuring the listener fails.
    pub fn bind_existing_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<DeviceHub<Bound>, ServerError> {
        self.bind_to_listener(std_listener)
    }
}

impl DeviceHub<Bound> {
    /// Returns the bound address, or `None` if retrieving it fails.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }

    /// Rebind to a fresh address.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if binding or configuring the listener fails.
    pub fn bind(self, addr: SocketAddr) -> Result<Self, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Rebind using an existing `StdTcpListener`.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if configuring the listener fails.
    pub fn bind_existing_listener(self, std_listener: StdTcpListener) -> Result<Self, ServerError> {
        self.bind_to_listener(std_listener)
    }
}
