//! Metric helpers for `hubwire`.
//!
//! Thin wrappers over the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Gauge tracking open device connections.
pub const CONNECTIONS_ACTIVE: &str = "hubwire_connections_active";
/// Counter of frames read from or written to devices.
pub const FRAMES_PROCESSED: &str = "hubwire_frames_processed_total";
/// Counter of frames dropped by framing or decoding.
pub const DECODE_ERRORS: &str = "hubwire_decode_errors_total";
/// Counter of handlers that returned an error or panicked.
pub const DISPATCH_FAILURES: &str = "hubwire_dispatch_failures_total";
/// Counter of connections evicted for inactivity.
pub const EVICTIONS: &str = "hubwire_evictions_total";
/// Counter of commands that could not be delivered.
pub const SEND_FAILURES: &str = "hubwire_send_failures_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames received from a device.
    Inbound,
    /// Commands sent to a device.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "labels only used with metrics"))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a dropped inbound frame.
pub fn inc_decode_errors() {
    #[cfg(feature = "metrics")]
    counter!(DECODE_ERRORS).increment(1);
}

/// Record a failed or panicking handler.
pub fn inc_dispatch_failures() {
    #[cfg(feature = "metrics")]
    counter!(DISPATCH_FAILURES).increment(1);
}

/// Record an idle eviction.
pub fn inc_evictions() {
    #[cfg(feature = "metrics")]
    counter!(EVICTIONS).increment(1);
}

/// Record an undeliverable command.
pub fn inc_send_failures() {
    #[cfg(feature = "metrics")]
    counter!(SEND_FAILURES).increment(1);
}
