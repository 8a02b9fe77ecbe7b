//! Connection-level faults.
//!
//! Codec, dispatch, send and server errors live beside the code that raises
//! them; this module holds the reasons a device connection ends.

use std::io;

use thiserror::Error;

/// Why a device connection was torn down.
#[derive(Debug, Error)]
pub enum ConnectionFault {
    /// Reading from the socket failed.
    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),
    /// Writing to the socket failed.
    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),
    /// The peer closed its end of the stream.
    #[error("peer closed the connection")]
    PeerClosed,
}

impl ConnectionFault {
    /// Whether the connection ended without a transport error.
    #[must_use]
    pub fn is_clean_close(&self) -> bool { matches!(self, Self::PeerClosed) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_close_is_clean() {
        assert!(ConnectionFault::PeerClosed.is_clean_close());
        let fault = ConnectionFault::ReadFailed(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!fault.is_clean_close());
        assert!(fault.to_string().starts_with("read failed"));
    }
}
