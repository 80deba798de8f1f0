// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of the service map receiver.
//!
//! ```text
//! Created ──start──▶ Starting ──▶ Running ──shutdown──▶ Stopping ──▶ Stopped
//!    └──────────────────────────shutdown─────────────────────────────▲
//! ```
//!
//! `start` spawns the flusher task (and an ingestion task when an
//! [`EventReader`] was supplied) on the ambient tokio runtime and returns
//! immediately. `shutdown` cancels both and returns without waiting for a
//! dispatch that may be in flight. Producers keep working throughout: after
//! shutdown their messages are buffered but never flushed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::buffer::MessageBuffer;
use crate::config::ReceiverConfig;
use crate::consumer::TracesConsumer;
use crate::error::ReceiverError;
use crate::flusher::TraceFlusher;
use crate::message::RawMessage;
use crate::source::{EventReader, Ingestor, SocketEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct State {
    status: ReceiverStatus,
    cancel: Option<CancellationToken>,
    reader: Option<EventReader>,
    tasks: Vec<JoinHandle<()>>,
}

/// Cloneable producer handle onto a receiver's buffer.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    buffer: Arc<MessageBuffer>,
}

impl IngestHandle {
    pub fn add_message(
        &self,
        address_a: impl Into<String>,
        port_a: u16,
        address_b: impl Into<String>,
        port_b: u16,
        payload: impl Into<String>,
    ) {
        self.append(RawMessage::build(
            address_a, port_a, address_b, port_b, payload,
        ));
    }

    pub fn ingest(&self, event: SocketEvent) {
        self.append(RawMessage::from(event));
    }

    pub fn append(&self, message: RawMessage) {
        self.buffer.append(message);
    }
}

pub struct ServiceMapReceiver {
    config: ReceiverConfig,
    buffer: Arc<MessageBuffer>,
    consumer: Option<Arc<dyn TracesConsumer>>,
    state: Mutex<State>,
}

impl ServiceMapReceiver {
    pub fn new(config: ReceiverConfig) -> Result<Self, ReceiverError> {
        config.validate()?;
        Ok(Self {
            buffer: Arc::new(MessageBuffer::with_limit(config.max_buffered_messages)),
            config,
            consumer: None,
            state: Mutex::new(State {
                status: ReceiverStatus::Created,
                cancel: None,
                reader: None,
                tasks: Vec::new(),
            }),
        })
    }

    #[must_use]
    pub fn with_consumer(mut self, consumer: Arc<dyn TracesConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    #[must_use]
    pub fn with_event_reader(mut self, reader: EventReader) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .reader = Some(reader);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> ReceiverStatus {
        self.lock_state().status
    }

    /// Spawns the receiver's tasks under a child of `parent`.
    ///
    /// Fails with `AlreadyStarted`/`AlreadyStopped` unless the receiver is
    /// freshly created, then with [`ReceiverError::NoRuntime`] outside a tokio
    /// runtime. The state is left untouched on error.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), ReceiverError> {
        let mut state = self.lock_state();
        match state.status {
            ReceiverStatus::Created => {}
            ReceiverStatus::Stopped => return Err(ReceiverError::AlreadyStopped),
            _ => return Err(ReceiverError::AlreadyStarted),
        }
        let runtime = Handle::try_current().map_err(|_| ReceiverError::NoRuntime)?;
        state.status = ReceiverStatus::Starting;

        let cancel = parent.child_token();

        if let Some(reader) = state.reader.take() {
            let ingestor = Ingestor::new(reader, Arc::clone(&self.buffer));
            let task = runtime.spawn(ingestor.spin(cancel.clone()));
            state.tasks.push(task);
        }

        let flusher = TraceFlusher::new(
            Arc::clone(&self.buffer),
            &self.config,
            self.consumer.clone(),
        );
        let task = runtime.spawn(flusher.run(cancel.clone()));
        state.tasks.push(task);

        state.cancel = Some(cancel);
        state.status = ReceiverStatus::Running;
        info!(
            "Service map receiver started, flushing every {:?}",
            self.config.flush_interval
        );
        Ok(())
    }

    /// Cancels the receiver's tasks. Does not wait for them to finish.
    pub fn shutdown(&self) -> Result<(), ReceiverError> {
        let mut state = self.lock_state();
        if state.status == ReceiverStatus::Stopped {
            return Err(ReceiverError::AlreadyStopped);
        }
        state.status = ReceiverStatus::Stopping;

        match state.cancel.take() {
            Some(cancel) => cancel.cancel(),
            None => debug!("Shutting down a receiver that was never started"),
        }
        state.reader = None;

        state.status = ReceiverStatus::Stopped;
        info!("Service map receiver stopped");
        Ok(())
    }

    /// Waits for the tasks spawned by `start` to exit, including a final
    /// flush when one is configured. Returns immediately if nothing was
    /// started; call after `shutdown` or after the parent token is cancelled.
    pub async fn wait_stopped(&self) {
        let tasks = std::mem::take(&mut self.lock_state().tasks);
        for task in tasks {
            if let Err(e) = task.await {
                error!("Service map receiver task failed: {}", e);
            }
        }
    }

    /// Records one observed exchange. Never fails and never blocks on I/O.
    pub fn add_message(
        &self,
        address_a: impl Into<String>,
        port_a: u16,
        address_b: impl Into<String>,
        port_b: u16,
        payload: impl Into<String>,
    ) {
        self.buffer.append(RawMessage::build(
            address_a, port_a, address_b, port_b, payload,
        ));
    }

    pub fn ingest(&self, event: SocketEvent) {
        self.buffer.append(RawMessage::from(event));
    }

    pub fn handle(&self) -> IngestHandle {
        IngestHandle {
            buffer: Arc::clone(&self.buffer),
        }
    }

    pub fn buffered_messages(&self) -> usize {
        self.buffer.len()
    }

    pub fn dropped_messages(&self) -> u64 {
        self.buffer.dropped()
    }
}
