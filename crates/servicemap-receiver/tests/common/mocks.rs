// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace consumers that record what they were given

use servicemap_receiver::{ConsumeError, Traces, TracesConsumer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Keeps every batch it receives, optionally after a delay.
#[derive(Default)]
pub struct RecordingConsumer {
    batches: Mutex<Vec<Traces>>,
    delay: Option<Duration>,
    in_flight: AtomicBool,
    completed: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingConsumer {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<Traces> {
        self.batches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TracesConsumer for RecordingConsumer {
    async fn consume_traces(
        &self,
        traces: Traces,
        _cancel: &CancellationToken,
    ) -> Result<(), ConsumeError> {
        self.in_flight.store(true, Ordering::SeqCst);
        self.batches.lock().unwrap().push(traces);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.store(false, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Rejects every batch.
#[allow(dead_code)]
#[derive(Default)]
pub struct RejectingConsumer {
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl TracesConsumer for RejectingConsumer {
    async fn consume_traces(
        &self,
        _traces: Traces,
        _cancel: &CancellationToken,
    ) -> Result<(), ConsumeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ConsumeError::Rejected("exporter queue is full".to_string()))
    }
}
