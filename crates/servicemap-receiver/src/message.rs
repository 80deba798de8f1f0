// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Observed client/server exchanges.
//!
//! Capture sources only see two endpoints and a payload fragment; they do not
//! know which side initiated the connection. [`classify`] makes that call with
//! a port heuristic: ephemeral client ports are allocated from the high end of
//! the range, so the endpoint with the higher port is labelled the client.
//! This is an approximation, not an authoritative answer.
//!
//! When both ports are equal the first endpoint passed in is the client.

use std::time::SystemTime;

/// One side of an observed exchange, before it has been labelled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    /// Empty when the owning process is unknown
    pub process_name: String,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            process_name: String::new(),
        }
    }

    #[must_use]
    pub fn with_process_name(mut self, process_name: impl Into<String>) -> Self {
        self.process_name = process_name.into();
        self
    }
}

/// Labels two endpoints as `(client, server)`.
///
/// The endpoint with the higher port is the client. Ties go to `first`.
pub fn classify(first: Endpoint, second: Endpoint) -> (Endpoint, Endpoint) {
    if first.port < second.port {
        (second, first)
    } else {
        (first, second)
    }
}

/// One observed exchange with classified roles.
///
/// Optional fields use their empty value (`""` or `0`) for "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub client_address: String,
    pub server_address: String,
    pub client_port: u16,
    pub server_port: u16,
    pub client_process_name: String,
    pub server_process_name: String,
    /// 0 when no status line was observed
    pub status_code: u16,
    pub operation: String,
    pub path: String,
    /// Lowercase hex, 32 chars when present
    pub trace_id: String,
    /// Lowercase hex, 16 chars when present
    pub parent_span_id: String,
    payload: String,
    timestamp: SystemTime,
}

impl RawMessage {
    /// Builds a message from two unlabelled endpoint/port pairs and stamps the
    /// receipt time. Never fails.
    pub fn build(
        address_a: impl Into<String>,
        port_a: u16,
        address_b: impl Into<String>,
        port_b: u16,
        payload: impl Into<String>,
    ) -> Self {
        Self::from_endpoints(
            Endpoint::new(address_a, port_a),
            Endpoint::new(address_b, port_b),
            payload,
        )
    }

    /// Same as [`RawMessage::build`], carrying process names through classification.
    pub fn from_endpoints(a: Endpoint, b: Endpoint, payload: impl Into<String>) -> Self {
        let (client, server) = classify(a, b);
        Self {
            client_address: client.address,
            server_address: server.address,
            client_port: client.port,
            server_port: server.port,
            client_process_name: client.process_name,
            server_process_name: server.process_name,
            status_code: 0,
            operation: String::new(),
            path: String::new(),
            trace_id: String::new(),
            parent_span_id: String::new(),
            payload: payload.into(),
            timestamp: SystemTime::now(),
        }
    }

    /// Attaches correlation identifiers supplied by the capture source.
    #[must_use]
    pub fn with_trace_context(
        mut self,
        trace_id: impl Into<String>,
        parent_span_id: impl Into<String>,
    ) -> Self {
        self.trace_id = trace_id.into();
        self.parent_span_id = parent_span_id.into();
        self
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}
