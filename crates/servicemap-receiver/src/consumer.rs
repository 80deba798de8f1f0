// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ConsumeError;
use crate::trace_builder::Traces;

/// Downstream sink for synthesized traces.
///
/// Called at most once per flush and never with an empty [`Traces`]. A
/// returned error is logged by the flusher and the batch is discarded.
#[async_trait]
pub trait TracesConsumer: Send + Sync {
    async fn consume_traces(
        &self,
        traces: Traces,
        cancel: &CancellationToken,
    ) -> Result<(), ConsumeError>;
}

/// Forwards every batch into a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: Sender<Traces>,
}

impl ChannelConsumer {
    pub fn new(tx: Sender<Traces>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl TracesConsumer for ChannelConsumer {
    async fn consume_traces(
        &self,
        traces: Traces,
        cancel: &CancellationToken,
    ) -> Result<(), ConsumeError> {
        tokio::select! {
            sent = self.tx.send(traces) => sent.map_err(|_| ConsumeError::Closed),
            () = cancel.cancelled() => Err(ConsumeError::Rejected(
                "cancelled while waiting for channel capacity".to_string(),
            )),
        }
    }
}

/// Writes a summary of every batch to the log. Useful when no backend is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingConsumer;

#[async_trait]
impl TracesConsumer for LoggingConsumer {
    async fn consume_traces(
        &self,
        traces: Traces,
        _cancel: &CancellationToken,
    ) -> Result<(), ConsumeError> {
        info!(
            "Service map batch: {} spans across {} resources",
            traces.span_count(),
            traces.resource_spans().len()
        );
        for span in traces.spans() {
            debug!(
                trace_id = %hex::encode(&span.trace_id),
                span_id = %hex::encode(&span.span_id),
                parent = %hex::encode(&span.parent_span_id),
                "{}",
                span.name
            );
        }
        Ok(())
    }
}
