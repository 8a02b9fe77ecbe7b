#![doc(html_root_url = "https://docs.rs/hubwire/latest")]
//! Public API for the `hubwire` library.
//!
//! `hubwire` is the device-communication core of a fulfillment-center
//! automation stack: a TCP hub that frames newline-delimited messages from
//! hardware controllers, decodes them with a pluggable codec, binds each
//! connection to the device id it declares, routes messages to registered
//! handlers, and writes commands back to the right socket.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hubwire::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ServerError> {
//! let hub = DeviceHub::new(Arc::new(JsonCodec));
//! let sender = hub.sender();
//! hub.dispatcher()
//!     .register("gt", MessageKind::Event, move |msg: Message| {
//!         let sender = sender.clone();
//!         async move {
//!             if msg.name.as_deref() == Some("card") {
//!                 let open = Command::new("door").with_action("open");
//!                 sender.send(&msg.device, &open).await;
//!             }
//!             Ok::<(), HandlerError>(())
//!         }
//!     });
//! hub.bind(([0, 0, 0, 0], 9000).into())?.run().await
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod prelude;
pub mod registry;
pub mod sender;
pub mod server;
pub mod services;

pub use codec::{CompactCodec, DecodeError, EncodeError, JsonCodec, MessageCodec};
pub use config::{HubConfig, WireFormat};
pub use dispatch::{DeviceSelector, DispatchOutcome, HandlerTable};
pub use error::ConnectionFault;
pub use frame::{FrameReader, FramingError, LineCodec};
pub use message::{Command, DeviceId, Message, MessageKind, Payload};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, FRAMES_PROCESSED};
pub use registry::{ConnectionHandle, ConnectionId, DeviceNotConnected, DeviceRegistry};
pub use sender::{CommandSender, SendError};
pub use server::{BackoffConfig, DeviceHub, ServerError};
pub use services::{NotRegistered, ServiceRegistry};
