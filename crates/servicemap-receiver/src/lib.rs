// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Service Map Receiver
//!
//! Synthesizes "who called whom" traces from passively observed socket
//! traffic, without instrumenting the services involved.
//!
//! ## Pipeline
//!
//! ```text
//! producer ─▶ RawMessage::build ─▶ MessageBuffer ─[tick]─▶ parser ─▶ TraceBuilder ─▶ TracesConsumer
//! ```
//!
//! - [`message`]: client/server classification of an observed exchange
//! - [`buffer`]: concurrency-safe ingestion buffer
//! - [`flusher`]: periodic drain and dispatch
//! - [`parser`]: best-effort HTTP metadata extraction
//! - [`trace_builder`]: OTLP span synthesis
//! - [`receiver`]: start/shutdown lifecycle and producer entry points
//! - [`source`]: in-process and UDP event sources
//! - [`consumer`]: outbound trait and stock sinks

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod consumer;
pub mod error;
pub mod flusher;
pub mod logger;
pub mod message;
pub mod parser;
pub mod receiver;
pub mod source;
pub mod trace_builder;

pub use config::ReceiverConfig;
pub use consumer::{ChannelConsumer, LoggingConsumer, TracesConsumer};
pub use error::{ConsumeError, ReceiverError};
pub use message::RawMessage;
pub use receiver::{IngestHandle, ReceiverStatus, ServiceMapReceiver};
pub use source::{EventReader, EventSender, SocketEvent};
pub use trace_builder::Traces;
