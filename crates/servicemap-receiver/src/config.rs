// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ReceiverError;
use std::env;
use std::time::Duration;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for the service map receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// How often buffered messages are drained and turned into traces
    pub flush_interval: Duration,
    /// Optional cap on buffered messages. `None` keeps the buffer unbounded;
    /// when set, the oldest message is evicted to make room for a new one.
    pub max_buffered_messages: Option<usize>,
    /// Drain and dispatch one last time after cancellation is observed
    pub flush_on_shutdown: bool,
    /// Emit a server-side child span next to every client span
    pub emit_server_spans: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_buffered_messages: None,
            flush_on_shutdown: false,
            emit_server_spans: false,
        }
    }
}

impl ReceiverConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ReceiverError> {
        let flush_interval = env::var("SERVICEMAP_FLUSH_INTERVAL_SECS")
            .ok()
            .and_then(|secs| secs.trim().parse::<u64>().ok())
            .map_or(DEFAULT_FLUSH_INTERVAL, Duration::from_secs);
        let max_buffered_messages = env::var("SERVICEMAP_MAX_BUFFERED_MESSAGES")
            .ok()
            .and_then(|max| max.trim().parse::<usize>().ok());
        let flush_on_shutdown = env::var("SERVICEMAP_FLUSH_ON_SHUTDOWN")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let emit_server_spans = env::var("SERVICEMAP_SERVER_SPANS")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);

        let config = Self {
            flush_interval,
            max_buffered_messages,
            flush_on_shutdown,
            emit_server_spans,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ReceiverError> {
        if self.flush_interval.is_zero() {
            return Err(ReceiverError::InvalidConfig(
                "flush interval must be greater than 0".to_string(),
            ));
        }

        if self.max_buffered_messages == Some(0) {
            return Err(ReceiverError::InvalidConfig(
                "SERVICEMAP_MAX_BUFFERED_MESSAGES must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}
