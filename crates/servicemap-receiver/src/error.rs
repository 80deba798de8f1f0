// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors reported by the receiver's control path.
///
/// None of these are fatal: the receiver stays in whatever state it was in
/// when the error was returned.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReceiverError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("component already started")]
    AlreadyStarted,

    #[error("component already stopped")]
    AlreadyStopped,

    #[error("no tokio runtime available to spawn receiver tasks")]
    NoRuntime,
}

/// Errors a [`crate::consumer::TracesConsumer`] may return for a batch.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("trace consumer rejected batch: {0}")]
    Rejected(String),

    #[error("trace consumer is closed")]
    Closed,
}
