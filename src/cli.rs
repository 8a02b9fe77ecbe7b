//! Command line interface for the `hubwire` daemon.
//!
//! Flags override values from the configuration file.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `hubwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hubwire",
    version,
    about = "TCP hub for fulfillment-center device controllers"
)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Address to listen on.
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,
    /// Wire format spoken by devices.
    #[arg(short, long, value_parser = ["json", "compact"])]
    pub format: Option<String>,
    /// Seconds of silence before a connection is evicted.
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,
    /// Seconds between idle sweeps.
    #[arg(long, value_name = "SECS")]
    pub sweep_interval: Option<u64>,
    /// Longest accepted frame in bytes; 0 disables the limit.
    #[arg(long, value_name = "BYTES")]
    pub max_frame_length: Option<usize>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "hubwire",
            "--listen",
            "127.0.0.1:9100",
            "--format",
            "compact",
            "--idle-timeout",
            "30",
        ]);
        assert_eq!(
            cli.listen.map(|addr| addr.port()),
            Some(9100)
        );
        assert_eq!(cli.format.as_deref(), Some("compact"));
        assert_eq!(cli.idle_timeout, Some(30));
        assert!(cli.config.is_none());
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["hubwire", "--format", "bincode"]).is_err());
    }
}
