//! Test support for `hubwire`.
//!
//! [`SimulatedDevice`] plays the part of a hardware controller over a real
//! TCP connection, and [`LoggerHandle`] serializes access to the global
//! `logtest` logger so tests can assert on log output.
//!
//! ```rust,no_run
//! use hubwire_testing::SimulatedDevice;
//!
//! # async fn example(addr: std::net::SocketAddr) -> std::io::Result<()> {
//! let mut gate = SimulatedDevice::connect(addr).await?;
//! gate.send_line(r#"{"dev":"gt","tp":"evt","evt":"card"}"#).await?;
//! let command = gate.recv_line().await?;
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod logging;

pub use device::{RunningHub, SimulatedDevice, spawn_hub};
pub use logging::{LoggerHandle, logger};
