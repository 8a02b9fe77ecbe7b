//! Convenience imports for wiring a hub and its controllers.
//!
//! Prefer importing specialised APIs directly from their owning modules.

pub use crate::{
    codec::{CompactCodec, JsonCodec, MessageCodec},
    dispatch::{DeviceSelector, HandlerError, HandlerTable},
    message::{Command, DeviceId, Message, MessageKind, Payload},
    sender::{CommandSender, SendError},
    server::{DeviceHub, ServerError},
    services::ServiceRegistry,
};
