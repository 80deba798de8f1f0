// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use servicemap_receiver::{
    logger::Formatter, EventReader, LoggingConsumer, ReceiverConfig, ServiceMapReceiver,
};

const DEFAULT_EVENTS_HOST: &str = "127.0.0.1";
const DEFAULT_EVENTS_PORT: u16 = 8127;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("SERVICEMAP_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = match EnvFilter::try_new(&log_level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse SERVICEMAP_LOG_LEVEL {log_level:?}: {e}");
            EnvFilter::new("info")
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .event_format(Formatter)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    if let Err(e) = run().await {
        error!("Service map agent exited with error: {:#}", e);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ReceiverConfig::from_env().context("invalid receiver configuration")?;

    let events_host =
        env::var("SERVICEMAP_EVENTS_HOST").unwrap_or_else(|_| DEFAULT_EVENTS_HOST.to_string());
    let events_port = env::var("SERVICEMAP_EVENTS_PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_EVENTS_PORT);

    let reader = EventReader::bind_udp((events_host.as_str(), events_port))
        .await
        .with_context(|| format!("failed to bind event socket {events_host}:{events_port}"))?;

    let receiver = ServiceMapReceiver::new(config)?
        .with_consumer(Arc::new(LoggingConsumer))
        .with_event_reader(reader);

    let cancel = CancellationToken::new();
    receiver.start(&cancel)?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    receiver.shutdown()?;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, receiver.wait_stopped())
        .await
        .is_err()
    {
        error!("Timed out waiting for the receiver to stop");
    }
    cancel.cancel();
    Ok(())
}
