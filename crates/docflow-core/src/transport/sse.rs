//! Server-sent-events implementation of [`EventSource`].
//!
//! For servers or proxies that only expose the push channel over plain HTTP.
//! Each `data:` frame carries the same envelope as the websocket channel
//! (see [`decode_envelope`]).

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Client;

use super::envelope::decode_envelope;
use super::{EventSource, EventStream};
use crate::api::{HttpApi, ProgressEvent};
use crate::error::{Result, SyncError};

type ByteStream = BoxStream<'static, reqwest::Result<bytes::Bytes>>;

/// Opens `GET /documents/{id}/events` as an SSE stream.
#[derive(Clone)]
pub struct SseEventSource {
    client: Client,
    base_url: String,
}

impl SseEventSource {
    pub fn new(api: &HttpApi) -> Self {
        Self {
            client: api.client().clone(),
            base_url: api.base_url().to_string(),
        }
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn connect(&self, document_id: &str) -> Result<EventStream> {
        let url = format!("{}/documents/{}/events", self.base_url, document_id);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Http {
                status: response.status().as_u16(),
                message: format!("event stream refused for {}", document_id),
            });
        }

        tracing::debug!(document_id = %document_id, "Event stream connected");

        let state = FrameReader {
            bytes: response.bytes_stream().boxed(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            document_id: document_id.to_string(),
        };

        let stream = futures::stream::unfold(state, |mut reader| async move {
            loop {
                if let Some(event) = reader.pending.pop_front() {
                    return Some((Ok(event), reader));
                }
                match reader.bytes.next().await {
                    Some(Ok(chunk)) => {
                        reader.buffer.extend_from_slice(&chunk);
                        reader.drain_frames();
                    }
                    Some(Err(e)) => return Some((Err(SyncError::from(e)), reader)),
                    None => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

struct FrameReader {
    bytes: ByteStream,
    /// Raw bytes; a chunk may end inside a multi-byte character.
    buffer: Vec<u8>,
    pending: VecDeque<ProgressEvent>,
    document_id: String,
}

impl FrameReader {
    /// Move every complete frame out of the buffer.
    fn drain_frames(&mut self) {
        self.buffer.retain(|b| *b != b'\r');
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).take(end).collect();
            match std::str::from_utf8(&frame) {
                Ok(frame) => {
                    if let Some(event) = parse_frame(frame, &self.document_id) {
                        self.pending.push_back(event);
                    }
                }
                Err(e) => {
                    tracing::warn!(document_id = %self.document_id, error = %e, "Event frame is not valid UTF-8");
                }
            }
        }
    }
}

/// Decode one SSE frame. Comments and frames without data yield `None`.
fn parse_frame(frame: &str, document_id: &str) -> Option<ProgressEvent> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();
    if data.is_empty() {
        return None;
    }
    decode_envelope(&data.join("\n"), document_id)
}
