// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event sources feeding the ingestion buffer.
//!
//! The capture mechanism itself lives outside this crate. It hands over
//! [`SocketEvent`]s either in-process through an [`EventSender`] or from
//! another process over UDP, where each datagram carries one or more
//! newline-separated JSON events:
//!
//! ```text
//! {"src_addr":"10.0.0.1","src_port":50000,"dst_addr":"10.0.0.2","dst_port":80,"payload":"GET / HTTP/1.1"}
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::buffer::MessageBuffer;
use crate::message::{Endpoint, RawMessage};

// Largest payload a single UDP datagram can carry
const BUFFER_SIZE: usize = 65_536;

// Backoff after consecutive read errors: 10ms * 2^n, with n capped so the
// wait never exceeds 10ms * 2^7 = 1.28s
const BASE_ERROR_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF_EXPONENT: u32 = 7;

/// One observation reported by a capture source, before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketEvent {
    pub src_addr: String,
    pub src_port: u16,
    pub dst_addr: String,
    pub dst_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_process: Option<String>,
    #[serde(default)]
    pub payload: String,
    /// Hex trace id, when the capture side already knows the trace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

impl From<SocketEvent> for RawMessage {
    fn from(event: SocketEvent) -> Self {
        let src = Endpoint::new(event.src_addr, event.src_port)
            .with_process_name(event.src_process.unwrap_or_default());
        let dst = Endpoint::new(event.dst_addr, event.dst_port)
            .with_process_name(event.dst_process.unwrap_or_default());
        let message = RawMessage::from_endpoints(src, dst, event.payload);
        match event.trace_id {
            Some(trace_id) => {
                message.with_trace_context(trace_id, event.parent_span_id.unwrap_or_default())
            }
            None => message,
        }
    }
}

/// In-process producer side of [`EventReader::Channel`].
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SocketEvent>,
}

impl EventSender {
    /// Fails only once the reading side has gone away.
    pub fn send(&self, event: SocketEvent) -> Result<(), mpsc::error::SendError<SocketEvent>> {
        self.tx.send(event)
    }
}

/// Where an [`Ingestor`] reads events from.
#[derive(Debug)]
pub enum EventReader {
    Channel(mpsc::UnboundedReceiver<SocketEvent>),
    Udp(UdpSocket),
    /// Replays a fixed list once, then reports exhaustion
    Mirror(Vec<SocketEvent>),
}

impl EventReader {
    pub fn channel() -> (EventSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, Self::Channel(rx))
    }

    pub async fn bind_udp<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::Udp(socket))
    }

    /// The bound address of a UDP reader.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Udp(socket) => socket.local_addr().ok(),
            _ => None,
        }
    }

    /// Waits for the next group of events. `Ok(None)` means the source is exhausted.
    async fn read(&mut self) -> io::Result<Option<Vec<SocketEvent>>> {
        match self {
            Self::Channel(rx) => Ok(rx.recv().await.map(|event| vec![event])),
            Self::Udp(socket) => {
                let mut buf = vec![0u8; BUFFER_SIZE];
                let (amt, src) = socket.recv_from(&mut buf).await?;
                Ok(Some(decode_datagram(&buf[..amt], src)))
            }
            Self::Mirror(events) => {
                if events.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(std::mem::take(events)))
                }
            }
        }
    }
}

fn decode_datagram(datagram: &[u8], src: SocketAddr) -> Vec<SocketEvent> {
    let Ok(text) = std::str::from_utf8(datagram) else {
        debug!("Dropping non UTF-8 datagram from {}", src);
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<SocketEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("Skipping malformed event from {}: {}", src, e);
                None
            }
        })
        .collect()
}

/// Moves events from an [`EventReader`] into the shared buffer.
pub struct Ingestor {
    reader: EventReader,
    buffer: Arc<MessageBuffer>,
}

impl Ingestor {
    pub fn new(reader: EventReader, buffer: Arc<MessageBuffer>) -> Self {
        Self { reader, buffer }
    }

    /// Reads until `cancel` fires or the reader is exhausted.
    pub async fn spin(mut self, cancel: CancellationToken) {
        if let Some(addr) = self.reader.local_addr() {
            info!("Listening for socket events on {}", addr);
        }
        let mut consecutive_errors: u32 = 0;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Event ingestion cancelled");
                    break;
                }
                events = self.reader.read() => match events {
                    Ok(Some(events)) => {
                        consecutive_errors = 0;
                        for event in events {
                            self.buffer.append(RawMessage::from(event));
                        }
                    }
                    Ok(None) => {
                        debug!("Event source exhausted");
                        break;
                    }
                    Err(e) => {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        error!(
                            "Failed to receive socket events ({} consecutive): {}",
                            consecutive_errors, e
                        );
                        if !backoff_after_error(consecutive_errors, &cancel).await {
                            break;
                        }
                    }
                },
            }
        }
    }
}

fn error_backoff(consecutive_errors: u32) -> Duration {
    let exponent = consecutive_errors.min(MAX_BACKOFF_EXPONENT);
    BASE_ERROR_BACKOFF * (1 << exponent)
}

/// Sleeps before the next read. Returns false if cancelled while waiting.
async fn backoff_after_error(consecutive_errors: u32, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(error_backoff(consecutive_errors)) => true,
        () = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(src_port: u16, dst_port: u16, payload: &str) -> SocketEvent {
        SocketEvent {
            src_addr: "10.0.0.1".to_string(),
            src_port,
            dst_addr: "10.0.0.2".to_string(),
            dst_port,
            payload: payload.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_event_into_message_classifies() {
        let mut e = event(80, 51000, "HTTP/1.1 200 OK");
        e.src_process = Some("nginx".to_string());
        let message = RawMessage::from(e);
        assert_eq!(message.client_address, "10.0.0.2");
        assert_eq!(message.client_port, 51000);
        assert_eq!(message.server_process_name, "nginx");
        assert!(message.client_process_name.is_empty());
    }

    #[test]
    fn test_event_trace_context_is_carried() {
        let mut e = event(51000, 80, "");
        e.trace_id = Some("4bf92f3577b34da6a3ce929d0e0e4736".to_string());
        let message = RawMessage::from(e);
        assert_eq!(message.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(message.parent_span_id.is_empty());
    }

    #[test]
    fn test_decode_datagram_skips_malformed_lines() {
        let src: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let datagram = format!(
            "{}\nnot json\n\n{}\n{{\"src_addr\":\"x\"}}\n",
            serde_json::to_string(&event(50000, 80, "a")).unwrap(),
            serde_json::to_string(&event(50001, 80, "b")).unwrap(),
        );
        let events = decode_datagram(datagram.as_bytes(), src);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload, "b");
        assert!(decode_datagram(&[0xff, 0xfe], src).is_empty());
    }

    #[test]
    fn test_payload_is_optional_in_json() {
        let parsed: SocketEvent = serde_json::from_str(
            r#"{"src_addr":"a","src_port":1,"dst_addr":"b","dst_port":2}"#,
        )
        .unwrap();
        assert!(parsed.payload.is_empty());
        assert_eq!(parsed.src_process, None);
    }

    #[test]
    fn test_error_backoff_grows_and_is_capped() {
        assert_eq!(error_backoff(1), Duration::from_millis(20));
        assert_eq!(error_backoff(2), Duration::from_millis(40));
        assert_eq!(error_backoff(7), Duration::from_millis(1280));
        assert_eq!(error_backoff(u32::MAX), Duration::from_millis(1280));
    }

    #[tokio::test]
    async fn test_backoff_sleeps_then_continues() {
        let started = tokio::time::Instant::now();
        assert!(backoff_after_error(1, &CancellationToken::new()).await);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_backoff_is_cut_short_by_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = tokio::time::timeout(
            Duration::from_millis(500),
            backoff_after_error(MAX_BACKOFF_EXPONENT, &cancel),
        )
        .await;
        assert!(matches!(result, Ok(false)));
    }

    #[tokio::test]
    async fn test_mirror_reader_is_drained_once() {
        let buffer = Arc::new(MessageBuffer::new());
        let reader = EventReader::Mirror(vec![event(50000, 80, "a"), event(50001, 80, "b")]);
        Ingestor::new(reader, Arc::clone(&buffer))
            .spin(CancellationToken::new())
            .await;
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test]
    async fn test_channel_reader() {
        let buffer = Arc::new(MessageBuffer::new());
        let (sender, reader) = EventReader::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Ingestor::new(reader, Arc::clone(&buffer)).spin(cancel.clone()));

        sender.send(event(50000, 80, "GET / HTTP/1.1")).unwrap();
        sender.send(event(50001, 80, "GET / HTTP/1.1")).unwrap();
        drop(sender);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_ingestion() {
        let buffer = Arc::new(MessageBuffer::new());
        let (sender, reader) = EventReader::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Ingestor::new(reader, Arc::clone(&buffer)).spin(cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(sender.send(event(50000, 80, "late")).is_err());
    }

    #[tokio::test]
    async fn test_udp_reader() {
        let buffer = Arc::new(MessageBuffer::new());
        let reader = EventReader::bind_udp("127.0.0.1:0").await.unwrap();
        let addr = reader.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Ingestor::new(reader, Arc::clone(&buffer)).spin(cancel.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let datagram = format!(
            "{}\n{}",
            serde_json::to_string(&event(50000, 80, "GET /a HTTP/1.1")).unwrap(),
            serde_json::to_string(&event(50001, 80, "GET /b HTTP/1.1")).unwrap(),
        );
        client.send_to(datagram.as_bytes(), addr).await.unwrap();

        for _ in 0..100 {
            if buffer.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(buffer.len(), 2);

        cancel.cancel();
        task.await.unwrap();
    }
}
