// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use opentelemetry_proto::tonic::common::v1::{any_value, KeyValue};
use servicemap_receiver::ReceiverConfig;
use std::time::Duration;

pub const FAST_FLUSH: Duration = Duration::from_millis(25);

#[allow(dead_code)]
pub fn fast_config() -> ReceiverConfig {
    ReceiverConfig {
        flush_interval: FAST_FLUSH,
        ..Default::default()
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub async fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[allow(dead_code)]
pub fn string_attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| match &v.value {
            Some(any_value::Value::StringValue(s)) => Some(s.as_str()),
            _ => None,
        })
}

#[allow(dead_code)]
pub fn int_attribute(attributes: &[KeyValue], key: &str) -> Option<i64> {
    attributes
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| match &v.value {
            Some(any_value::Value::IntValue(i)) => Some(*i),
            _ => None,
        })
}
