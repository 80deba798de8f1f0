// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::MessageBuffer;
use crate::config::ReceiverConfig;
use crate::consumer::TracesConsumer;
use crate::trace_builder::TraceBuilder;

/// What a single [`TraceFlusher::flush`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered, the consumer was not called
    Empty,
    /// The consumer accepted this many spans
    Dispatched(usize),
    /// Spans were built but no consumer is configured
    NoConsumer,
    /// The consumer returned an error; the batch is gone
    Failed,
}

/// Periodically drains the buffer and hands the resulting traces downstream.
pub struct TraceFlusher {
    buffer: Arc<MessageBuffer>,
    builder: TraceBuilder,
    consumer: Option<Arc<dyn TracesConsumer>>,
    interval: Duration,
    flush_on_shutdown: bool,
}

impl TraceFlusher {
    pub fn new(
        buffer: Arc<MessageBuffer>,
        config: &ReceiverConfig,
        consumer: Option<Arc<dyn TracesConsumer>>,
    ) -> Self {
        TraceFlusher {
            buffer,
            builder: TraceBuilder::new(config.emit_server_spans),
            consumer,
            interval: config.flush_interval,
            flush_on_shutdown: config.flush_on_shutdown,
        }
    }

    /// Drain, build, dispatch. Empty batches never reach the consumer and
    /// failed batches are not re-buffered.
    pub async fn flush(&self, cancel: &CancellationToken) -> FlushOutcome {
        let dropped = self.buffer.take_dropped();
        if dropped > 0 {
            warn!(
                "Service map buffer full, evicted {} messages since last flush",
                dropped
            );
        }

        let batch = self.buffer.drain_all();
        if batch.is_empty() {
            debug!("No messages to flush");
            return FlushOutcome::Empty;
        }
        let message_count = batch.len();

        let traces = self.builder.build(batch);
        let span_count = traces.span_count();
        if span_count == 0 {
            return FlushOutcome::Empty;
        }

        let Some(consumer) = &self.consumer else {
            debug!(
                "No trace consumer configured, discarding {} spans",
                span_count
            );
            return FlushOutcome::NoConsumer;
        };

        debug!(
            "Flushing {} spans built from {} messages",
            span_count, message_count
        );
        match consumer.consume_traces(traces, cancel).await {
            Ok(()) => FlushOutcome::Dispatched(span_count),
            Err(e) => {
                error!("Failed to dispatch service map traces: {}", e);
                FlushOutcome::Failed
            }
        }
    }

    /// Flushes every interval until `cancel` fires. A flush already running
    /// when cancellation arrives is finished; no new one starts afterwards,
    /// except for the optional final drain.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush(&cancel).await;
                }
            }
        }

        if self.flush_on_shutdown {
            debug!("Final flush of service map traces");
            // The run token is already cancelled; give the consumer a live one.
            self.flush(&CancellationToken::new()).await;
        } else if !self.buffer.is_empty() {
            debug!(
                "Stopping with {} unflushed messages",
                self.buffer.len()
            );
        }
    }
}
