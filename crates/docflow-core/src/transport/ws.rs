//! Websocket implementation of [`EventSource`].
//!
//! Connects to `{base}/ws/documents/{id}/progress`. The server sends the
//! current progress right after the upgrade, then pushes envelopes (see
//! [`decode_envelope`]) as the pipeline advances, with periodic heartbeats.
//! The client never sends anything; pings are answered by tungstenite.

use async_trait::async_trait;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::envelope::decode_envelope;
use super::{EventSource, EventStream};
use crate::api::{HttpApi, ProgressEvent};
use crate::error::{Result, SyncError};

/// Opens the per-document progress websocket.
#[derive(Clone)]
pub struct WsEventSource {
    base_url: String,
}

impl WsEventSource {
    pub fn new(api: &HttpApi) -> Self {
        Self {
            base_url: websocket_base(api.base_url()),
        }
    }

    fn progress_url(&self, document_id: &str) -> String {
        format!("{}/ws/documents/{}/progress", self.base_url, document_id)
    }
}

/// Map an HTTP base URL onto the matching websocket scheme.
fn websocket_base(http_base: &str) -> String {
    if let Some(rest) = http_base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = http_base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        http_base.to_string()
    }
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn connect(&self, document_id: &str) -> Result<EventStream> {
        let url = self.progress_url(document_id);
        let (socket, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(pair) => pair,
            Err(WsError::Http(response)) => {
                return Err(SyncError::Http {
                    status: response.status().as_u16(),
                    message: format!("progress channel refused for {}", document_id),
                })
            }
            Err(e) => return Err(SyncError::transport(e)),
        };

        tracing::debug!(document_id = %document_id, "Progress websocket connected");

        let document_id = document_id.to_string();
        let stream = socket
            .take_while(|message| futures::future::ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(move |message| {
                futures::future::ready(decode_message(message, &document_id))
            });
        Ok(stream.boxed())
    }
}

/// Turn one websocket message into a stream item. Control frames and
/// skipped envelopes yield `None`.
fn decode_message(
    message: std::result::Result<Message, WsError>,
    document_id: &str,
) -> Option<Result<ProgressEvent>> {
    match message {
        Ok(Message::Text(text)) => decode_envelope(text.as_str(), document_id).map(Ok),
        Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
            Ok(text) => decode_envelope(text, document_id).map(Ok),
            Err(e) => {
                tracing::warn!(document_id = %document_id, error = %e, "Binary progress message is not UTF-8");
                None
            }
        },
        Ok(_) => None,
        Err(e) => Some(Err(SyncError::transport(e))),
    }
}
