// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a drained batch of messages into OTLP trace data.
//!
//! Every message becomes one `CLIENT` span. A single payload fragment gives no
//! way to measure duration, so spans start and end at the receipt time.
//!
//! # Identifiers
//!
//! A message that already carries trace context (set by the capture source or
//! found in a `traceparent` header) joins that trace, and its parent span id
//! is kept when valid. Anything else starts a fresh trace with a random
//! 128-bit trace id and no parent. Span ids are always freshly generated.
//!
//! # Resources
//!
//! The client span is attributed to the client process (or its address when
//! the process is unknown). With server spans enabled, a `SERVER` child span
//! is attributed to the server side of the same exchange; this is what lets a
//! backend draw an edge between the two services.

use std::time::UNIX_EPOCH;

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind;
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span, Status};
use rand::Rng;
use tracing::debug;

use crate::buffer::Batch;
use crate::message::RawMessage;
use crate::parser::{self, ParsedMetadata};

/// Span name used when no request line could be extracted.
pub const DEFAULT_SPAN_NAME: &str = "servicemap.exchange";

const SCOPE_NAME: &str = "servicemapreceiver";
const SCOPE_VERSION: &str = env!("CARGO_PKG_VERSION");

const TRACE_ID_LEN: usize = 16;
const SPAN_ID_LEN: usize = 8;

pub const SERVICE_NAME: &str = "service.name";
pub const CLIENT_ADDRESS: &str = "client.address";
pub const CLIENT_PORT: &str = "client.port";
pub const SERVER_ADDRESS: &str = "server.address";
pub const SERVER_PORT: &str = "server.port";
pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_TARGET: &str = "http.target";
pub const HTTP_STATUS_CODE: &str = "http.status_code";
pub const HTTP_HOST: &str = "http.host";
pub const HTTP_USER_AGENT: &str = "http.user_agent";

/// A set of spans ready for a [`crate::consumer::TracesConsumer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traces {
    resource_spans: Vec<ResourceSpans>,
}

impl Traces {
    pub fn resource_spans(&self) -> &[ResourceSpans] {
        &self.resource_spans
    }

    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.resource_spans
            .iter()
            .flat_map(|rs| rs.scope_spans.iter())
            .flat_map(|ss| ss.spans.iter())
    }

    pub fn span_count(&self) -> usize {
        self.spans().count()
    }

    pub fn is_empty(&self) -> bool {
        self.span_count() == 0
    }

    pub fn into_export_request(self) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: self.resource_spans,
        }
    }
}

/// What a message says about itself once the payload has been parsed.
/// Fields set on the message by the capture source win over parsed ones.
struct Exchange<'a> {
    message: &'a RawMessage,
    operation: String,
    path: String,
    status_code: u16,
    host: String,
    user_agent: String,
    trace_id: String,
    parent_span_id: String,
}

impl<'a> Exchange<'a> {
    fn resolve(message: &'a RawMessage, parsed: ParsedMetadata) -> Self {
        fn prefer(own: &str, parsed: String) -> String {
            if own.is_empty() {
                parsed
            } else {
                own.to_string()
            }
        }

        let (trace_id, parent_span_id) = if message.trace_id.is_empty() {
            (parsed.trace_id, parsed.parent_span_id)
        } else {
            (message.trace_id.clone(), message.parent_span_id.clone())
        };

        Self {
            message,
            operation: prefer(&message.operation, parsed.operation),
            path: prefer(&message.path, parsed.path),
            status_code: if message.status_code == 0 {
                parsed.status_code
            } else {
                message.status_code
            },
            host: parsed.host,
            user_agent: parsed.user_agent,
            trace_id,
            parent_span_id,
        }
    }

    fn span_name(&self) -> String {
        if self.operation.is_empty() || self.path.is_empty() {
            DEFAULT_SPAN_NAME.to_string()
        } else {
            format!("{} {}", self.operation, self.path)
        }
    }

    fn attributes(&self) -> Vec<KeyValue> {
        let message = self.message;
        let mut attributes = vec![
            string_attribute(CLIENT_ADDRESS, &message.client_address),
            int_attribute(CLIENT_PORT, i64::from(message.client_port)),
            string_attribute(SERVER_ADDRESS, &message.server_address),
            int_attribute(SERVER_PORT, i64::from(message.server_port)),
        ];
        if !self.operation.is_empty() {
            attributes.push(string_attribute(HTTP_METHOD, &self.operation));
        }
        if !self.path.is_empty() {
            attributes.push(string_attribute(HTTP_TARGET, &self.path));
        }
        if self.status_code != 0 {
            attributes.push(int_attribute(HTTP_STATUS_CODE, i64::from(self.status_code)));
        }
        if !self.host.is_empty() {
            attributes.push(string_attribute(HTTP_HOST, &self.host));
        }
        if !self.user_agent.is_empty() {
            attributes.push(string_attribute(HTTP_USER_AGENT, &self.user_agent));
        }
        attributes
    }

    /// Client spans treat 4xx and 5xx as errors, server spans only 5xx.
    fn status(&self, kind: SpanKind) -> Option<Status> {
        let threshold = match kind {
            SpanKind::Server => 500,
            _ => 400,
        };
        if self.status_code >= threshold {
            Some(Status {
                message: format!("HTTP {}", self.status_code),
                code: StatusCode::Error as i32,
            })
        } else {
            None
        }
    }

    /// Trace id and parent span id for the client span.
    fn trace_context(&self) -> (Vec<u8>, Vec<u8>) {
        if self.trace_id.is_empty() {
            return (random_id::<TRACE_ID_LEN>(), Vec::new());
        }
        match decode_id(&self.trace_id, TRACE_ID_LEN) {
            Some(trace_id) => {
                let parent = decode_id(&self.parent_span_id, SPAN_ID_LEN).unwrap_or_default();
                (trace_id, parent)
            }
            None => {
                debug!(
                    "Ignoring malformed trace id {:?} from {}:{}",
                    self.trace_id, self.message.client_address, self.message.client_port
                );
                (random_id::<TRACE_ID_LEN>(), Vec::new())
            }
        }
    }
}

/// Builds trace payloads from drained batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceBuilder {
    emit_server_spans: bool,
}

impl TraceBuilder {
    pub fn new(emit_server_spans: bool) -> Self {
        Self { emit_server_spans }
    }

    /// Converts every message of `batch` into spans. An empty batch yields an
    /// empty [`Traces`].
    pub fn build(&self, batch: Batch) -> Traces {
        let mut resource_spans = Vec::with_capacity(batch.len());

        for message in &batch {
            let exchange = Exchange::resolve(message, parser::parse(message.payload()));
            let client_span = self.client_span(&exchange);

            if self.emit_server_spans {
                let server_span = server_span(&exchange, &client_span);
                resource_spans.push(resource_spans_for(
                    service_name(&message.server_process_name, &message.server_address),
                    server_span,
                ));
            }

            resource_spans.push(resource_spans_for(
                service_name(&message.client_process_name, &message.client_address),
                client_span,
            ));
        }

        Traces { resource_spans }
    }

    #[allow(clippy::unused_self)]
    fn client_span(&self, exchange: &Exchange<'_>) -> Span {
        let (trace_id, parent_span_id) = exchange.trace_context();
        let timestamp = unix_nanos(exchange.message);
        Span {
            trace_id,
            span_id: random_id::<SPAN_ID_LEN>(),
            parent_span_id,
            name: exchange.span_name(),
            kind: SpanKind::Client as i32,
            start_time_unix_nano: timestamp,
            end_time_unix_nano: timestamp,
            attributes: exchange.attributes(),
            status: exchange.status(SpanKind::Client),
            ..Default::default()
        }
    }
}

fn server_span(exchange: &Exchange<'_>, client_span: &Span) -> Span {
    Span {
        trace_id: client_span.trace_id.clone(),
        span_id: random_id::<SPAN_ID_LEN>(),
        parent_span_id: client_span.span_id.clone(),
        name: client_span.name.clone(),
        kind: SpanKind::Server as i32,
        start_time_unix_nano: client_span.start_time_unix_nano,
        end_time_unix_nano: client_span.end_time_unix_nano,
        attributes: client_span.attributes.clone(),
        status: exchange.status(SpanKind::Server),
        ..Default::default()
    }
}

fn resource_spans_for(service_name: &str, span: Span) -> ResourceSpans {
    ResourceSpans {
        resource: Some(Resource {
            attributes: vec![string_attribute(SERVICE_NAME, service_name)],
            ..Default::default()
        }),
        scope_spans: vec![ScopeSpans {
            scope: Some(InstrumentationScope {
                name: SCOPE_NAME.to_string(),
                version: SCOPE_VERSION.to_string(),
                ..Default::default()
            }),
            spans: vec![span],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn service_name<'a>(process_name: &'a str, address: &'a str) -> &'a str {
    if process_name.is_empty() {
        address
    } else {
        process_name
    }
}

fn string_attribute(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn int_attribute(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::IntValue(value)),
        }),
    }
}

fn unix_nanos(message: &RawMessage) -> u64 {
    message
        .timestamp()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Decodes a hex id of exactly `len` bytes. All-zero ids are invalid.
fn decode_id(hex_id: &str, len: usize) -> Option<Vec<u8>> {
    let bytes = hex::decode(hex_id).ok()?;
    if bytes.len() != len || bytes.iter().all(|b| *b == 0) {
        return None;
    }
    Some(bytes)
}

fn random_id<const N: usize>() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut id = [0u8; N];
    loop {
        rng.fill(&mut id[..]);
        if id.iter().any(|b| *b != 0) {
            return id.to_vec();
        }
    }
}
