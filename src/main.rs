//! `hubwire` daemon.
//!
//! Loads configuration, installs a tracing subscriber, and runs the device
//! hub until Ctrl+C. Controllers embedding the library register their own
//! handlers; the daemon logs every message it receives.

mod cli;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hubwire::{
    config::{HubConfig, WireFormat},
    dispatch::{DeviceSelector, HandlerError},
    message::{Message, MessageKind},
    server::DeviceHub,
};
use tracing_subscriber::EnvFilter;

fn load_config(cli: &cli::Cli) -> Result<HubConfig> {
    let mut config = match &cli.config {
        Some(path) => HubConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => HubConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(format) = &cli.format {
        config.format = format.parse::<WireFormat>()?;
    }
    if let Some(secs) = cli.idle_timeout {
        config.idle_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.sweep_interval {
        config.sweep_interval = Duration::from_secs(secs);
    }
    if let Some(limit) = cli.max_frame_length {
        config.max_frame_length = limit;
    }
    Ok(config)
}

#[cfg(feature = "metrics")]
fn install_metrics(config: &HubConfig) -> Result<()> {
    if let Some(addr) = config.metrics_listen {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        tracing::info!(%addr, "metrics exporter listening");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(config: &HubConfig) -> Result<()> {
    if config.metrics_listen.is_some() {
        tracing::warn!("metrics_listen is set but the metrics feature is disabled");
    }
    Ok(())
}

fn log_message(message: Message) -> hubwire::dispatch::HandlerFuture {
    Box::pin(async move {
        tracing::info!(
            device = %message.device,
            kind = %message.kind,
            name = ?message.name,
            action = ?message.action,
            payload = ?message.payload,
            "message received"
        );
        Ok::<(), HandlerError>(())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = load_config(&cli)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    install_metrics(&config)?;

    let dispatcher = std::sync::Arc::new(config.handler_table());
    for kind in [MessageKind::Event, MessageKind::Response, MessageKind::Error] {
        dispatcher.register(DeviceSelector::Any, kind, log_message);
    }

    let hub = DeviceHub::new(config.codec())
        .with_dispatcher(dispatcher)
        .idle_timeout(config.idle_timeout)
        .sweep_interval(config.sweep_interval)
        .max_frame_length(config.frame_limit())
        .bind(config.listen)
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!(listen = %config.listen, format = %config.format, "starting hubwire");
    hub.run().await?;
    Ok(())
}
