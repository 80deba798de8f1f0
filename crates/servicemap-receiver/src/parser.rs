// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Best-effort extraction of HTTP-shaped metadata from payload fragments.
//!
//! A captured fragment may be a request, a response, a piece of a body or
//! binary noise. Each matcher below looks for one thing, independently of the
//! others, and a fragment matching nothing is a normal outcome: every field of
//! [`ParsedMetadata`] is simply left empty.
//!
//! # Matchers
//!
//! | matcher          | example                                   | fields                        |
//! |------------------|-------------------------------------------|-------------------------------|
//! | request line     | `GET /orders HTTP/1.1`                    | `operation`, `path`           |
//! | status line      | `HTTP/1.1 503 Service Unavailable`        | `status_code`                 |
//! | host header      | `Host: shop.local`                        | `host`                        |
//! | user agent       | `User-Agent: curl/8.4.0`                  | `user_agent`                  |
//! | W3C traceparent  | `traceparent: 00-<trace>-<span>-01`       | `trace_id`, `parent_span_id`  |
//!
//! Header names are matched case-insensitively anywhere in the fragment, since
//! a captured fragment may start in the middle of a line.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    #[allow(clippy::expect_used)]
    static ref REQUEST_LINE_REGEX: Regex =
        Regex::new(r"(?P<operation>\w+)[ \t]+(?P<path>[a-z/].*) HTTP")
            .expect("failed creating regex");
    #[allow(clippy::expect_used)]
    static ref STATUS_LINE_REGEX: Regex =
        Regex::new(r"HTTP/[0-9.]+[ \t]+(?P<status>[0-9]+)").expect("failed creating regex");
    #[allow(clippy::expect_used)]
    static ref HOST_REGEX: Regex =
        Regex::new(r"(?i)host:[ \t]*(?P<host>[^\r\n]*)").expect("failed creating regex");
    #[allow(clippy::expect_used)]
    static ref USER_AGENT_REGEX: Regex =
        Regex::new(r"(?i)user-agent:[ \t]*(?P<agent>[^\r\n]*)").expect("failed creating regex");
    #[allow(clippy::expect_used)]
    static ref TRACEPARENT_REGEX: Regex = Regex::new(
        r"(?i)traceparent:[ \t]*(?P<version>[0-9a-f]{2})-(?P<trace_id>[0-9a-f]{32})-(?P<span_id>[0-9a-f]{16})-[0-9a-f]{2}"
    )
    .expect("failed creating regex");
}

/// Fields extracted from one payload fragment. Empty (or 0) means not found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMetadata {
    pub operation: String,
    pub path: String,
    pub status_code: u16,
    pub host: String,
    pub user_agent: String,
    pub trace_id: String,
    pub parent_span_id: String,
}

impl ParsedMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Runs every matcher against `payload`. Never fails.
pub fn parse(payload: &str) -> ParsedMetadata {
    let mut metadata = ParsedMetadata::default();

    if let Some((operation, path)) = request_line(payload) {
        metadata.operation = operation;
        metadata.path = path;
    }
    if let Some(status_code) = status_code(payload) {
        metadata.status_code = status_code;
    }
    if let Some(host) = host(payload) {
        metadata.host = host;
    }
    if let Some(user_agent) = user_agent(payload) {
        metadata.user_agent = user_agent;
    }
    if let Some((trace_id, parent_span_id)) = trace_parent(payload) {
        metadata.trace_id = trace_id;
        metadata.parent_span_id = parent_span_id;
    }

    metadata
}

/// `<verb> <path> HTTP...` → `(verb, path)`
pub fn request_line(payload: &str) -> Option<(String, String)> {
    let captures = REQUEST_LINE_REGEX.captures(payload)?;
    let operation = captures.name("operation")?.as_str();
    let path = captures.name("path")?.as_str().trim_end();
    Some((operation.to_string(), path.to_string()))
}

/// `HTTP/<version> <code>` → code. Codes that do not fit in a `u16` are ignored.
pub fn status_code(payload: &str) -> Option<u16> {
    STATUS_LINE_REGEX
        .captures(payload)?
        .name("status")?
        .as_str()
        .parse::<u16>()
        .ok()
}

pub fn host(payload: &str) -> Option<String> {
    header_value(&HOST_REGEX, "host", payload)
}

pub fn user_agent(payload: &str) -> Option<String> {
    header_value(&USER_AGENT_REGEX, "agent", payload)
}

/// W3C `traceparent` header → `(trace_id, parent_span_id)`, lowercased.
///
/// Version `ff` and all-zero identifiers are invalid under W3C Trace Context and
/// are ignored.
pub fn trace_parent(payload: &str) -> Option<(String, String)> {
    let captures = TRACEPARENT_REGEX.captures(payload)?;
    if captures.name("version")?.as_str().eq_ignore_ascii_case("ff") {
        return None;
    }
    let trace_id = captures.name("trace_id")?.as_str().to_ascii_lowercase();
    let span_id = captures.name("span_id")?.as_str().to_ascii_lowercase();
    if is_all_zeros(&trace_id) || is_all_zeros(&span_id) {
        return None;
    }
    Some((trace_id, span_id))
}

fn header_value(regex: &Regex, group: &str, payload: &str) -> Option<String> {
    let value = regex.captures(payload)?.name(group)?.as_str().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn is_all_zeros(hex: &str) -> bool {
    hex.bytes().all(|b| b == b'0')
}
