//! Hub configuration.
//!
//! `HubConfig` is read from a TOML file and then overridden by command line
//! flags. Every field has a default, so an empty file (or no file) yields a
//! working hub listening on `0.0.0.0:9000` with the JSON codec.
//!
//! ```toml
//! listen = "0.0.0.0:9000"
//! format = "json"
//! idle_timeout = "5m"
//! sweep_interval = "1m"
//! max_frame_length = 65536
//!
//! [aliases]
//! sr = "sort_controller"
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    path::Path,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    codec::{CompactCodec, JsonCodec, MessageCodec},
    dispatch::HandlerTable,
    frame::DEFAULT_MAX_FRAME_LENGTH,
};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`HubConfig`].
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Wire format spoken by every device on one hub.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Newline-delimited JSON objects.
    #[default]
    Json,
    /// Compact single-line text records.
    Compact,
}

impl WireFormat {
    /// Build the codec for this format.
    ///
    /// `default_device` names the device that unaddressed compact telemetry
    /// is attributed to; the JSON codec ignores it.
    #[must_use]
    pub fn codec(self, default_device: &str) -> Arc<dyn MessageCodec> {
        match self {
            Self::Json => Arc::new(JsonCodec),
            Self::Compact => Arc::new(CompactCodec::new(default_device)),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Compact => "compact",
        })
    }
}

/// Returned when a string names no known [`WireFormat`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown wire format `{0}` (expected `json` or `compact`)")]
pub struct UnknownFormat(pub String);

impl FromStr for WireFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(UnknownFormat(s.to_owned())),
        }
    }
}

/// Settings for one hub instance.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    /// Wire format spoken by devices.
    pub format: WireFormat,
    /// Connections silent for longer than this are evicted.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// How often the idle sweep runs.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Longest accepted frame in bytes; `0` disables the limit.
    pub max_frame_length: usize,
    /// Device that unaddressed compact telemetry belongs to.
    pub compact_device: String,
    /// Announced device id to handler device id.
    pub aliases: BTreeMap<String, String>,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Address for the Prometheus exporter, if enabled.
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9000)),
            format: WireFormat::Json,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            compact_device: "H".to_owned(),
            aliases: default_aliases(),
            log_level: "info".to_owned(),
            metrics_listen: None,
        }
    }
}

fn default_aliases() -> BTreeMap<String, String> {
    [
        ("sr", "sort_controller"),
        ("hs_ab", "env_controller_ab"),
        ("hs_cd", "env_controller_cd"),
        ("gt", "access_controller"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_owned(), to.to_owned()))
    .collect()
}

impl HubConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> { Ok(toml::from_str(text)?) }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Frame length limit, or `None` when unlimited.
    #[must_use]
    pub fn frame_limit(&self) -> Option<usize> {
        (self.max_frame_length > 0).then_some(self.max_frame_length)
    }

    /// Codec for the configured wire format.
    #[must_use]
    pub fn codec(&self) -> Arc<dyn MessageCodec> { self.format.codec(&self.compact_device) }

    /// Build a handler table with the configured aliases installed.
    #[must_use]
    pub fn handler_table(&self) -> HandlerTable {
        let table = HandlerTable::new();
        for (from, to) in &self.aliases {
            table.alias(from.as_str(), to.as_str());
        }
        table
    }
}
