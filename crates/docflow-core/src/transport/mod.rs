//! Push-channel subscriptions with reconnect and backoff.
//!
//! # Design
//!
//! - [`EventSource`] opens one raw event stream per document. It knows nothing
//!   about retries. [`WsEventSource`] is the server's native channel;
//!   [`SseEventSource`] serves deployments that only pass plain HTTP.
//! - [`EventTransport::subscribe`] spawns a task that keeps a source stream
//!   alive: exponential backoff with jitter between attempts, reset after a
//!   connection that delivered events, and a single
//!   [`TransportMessage::Degraded`] when the attempt bound is reached.
//! - [`Subscription`] owns the receiving end and a cancellation token.
//!   [`SubscriptionHandle::close`] is idempotent and nothing is delivered
//!   after it returns.
//!
//! Ordering and duplicates are not handled here; the normalizer copes with both.

mod envelope;
pub mod sse;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::ProgressEvent;
use crate::config::SyncTimings;
use crate::error::Result;

pub use sse::SseEventSource;
pub use ws::WsEventSource;

/// Stream of events for a single document. An `Err` item ends the connection.
pub type EventStream = BoxStream<'static, Result<ProgressEvent>>;

/// Opens raw push streams.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self, document_id: &str) -> Result<EventStream>;
}

/// Message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    Event(ProgressEvent),
    /// Reconnecting gave up; the caller should fall back to pulling.
    Degraded { attempts: u32, last_error: String },
}

/// Reconnect policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_timings(timings: &SyncTimings) -> Self {
        Self {
            max_attempts: timings.reconnect_max_attempts.max(1),
            base_delay: timings.reconnect_base_delay(),
            max_delay: timings.reconnect_max_delay(),
        }
    }

    /// Exponential delay before retry number `attempt` (1-based), capped, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let jitter_ms = (delay.as_millis() as u64 / 10).max(1);
        delay + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

/// Cancels a subscription. Cloneable; closing twice is a no-op.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    document_id: String,
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(document_id = %self.document_id, "Closing subscription");
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Receiving side of a document subscription.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::Receiver<TransportMessage>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Next message, or `None` once closed or given up.
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        if self.handle.is_closed() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.handle.cancel.cancelled() => None,
            msg = self.rx.recv() => msg,
        }
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel.cancel();
    }
}

/// Spawns and supervises per-document subscriptions.
#[derive(Clone)]
pub struct EventTransport {
    source: Arc<dyn EventSource>,
    policy: ReconnectPolicy,
}

impl EventTransport {
    pub fn new(source: Arc<dyn EventSource>, policy: ReconnectPolicy) -> Self {
        Self { source, policy }
    }

    /// Subscribe to a document. The connection task stops when `parent` is cancelled.
    pub fn subscribe(&self, document_id: &str, parent: &CancellationToken) -> Subscription {
        let cancel = parent.child_token();
        let (tx, rx) = mpsc::channel(64);

        let source = self.source.clone();
        let policy = self.policy.clone();
        let id = document_id.to_string();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run_connection(source, policy, id, tx, task_cancel).await;
        });

        Subscription {
            handle: SubscriptionHandle {
                document_id: document_id.to_string(),
                cancel,
            },
            rx,
        }
    }
}

enum StreamEnd {
    Cancelled,
    ReceiverGone,
    Closed { delivered: bool, error: Option<String> },
}

async fn run_connection(
    source: Arc<dyn EventSource>,
    policy: ReconnectPolicy,
    document_id: String,
    tx: mpsc::Sender<TransportMessage>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;
    let mut last_error = String::new();

    tracing::debug!(document_id = %document_id, "Subscription started");

    loop {
        if failures > 0 {
            if failures >= policy.max_attempts {
                tracing::warn!(
                    document_id = %document_id,
                    attempts = failures,
                    error = %last_error,
                    "Giving up on push channel"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tx.send(TransportMessage::Degraded {
                        attempts: failures,
                        last_error: last_error.clone(),
                    }) => {}
                }
                break;
            }

            let delay = policy.backoff_with_jitter(failures);
            tracing::debug!(
                document_id = %document_id,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting after backoff"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = source.connect(&document_id) => result,
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                failures += 1;
                last_error = e.to_string();
                tracing::debug!(document_id = %document_id, error = %e, "Connect failed");
                continue;
            }
        };

        match pump(stream, &tx, &cancel).await {
            StreamEnd::Cancelled | StreamEnd::ReceiverGone => break,
            StreamEnd::Closed { delivered, error } => {
                if delivered {
                    failures = 0;
                }
                failures += 1;
                last_error = error.unwrap_or_else(|| "stream ended".to_string());
            }
        }
    }

    tracing::debug!(document_id = %document_id, "Subscription stopped");
}

async fn pump(
    mut stream: EventStream,
    tx: &mpsc::Sender<TransportMessage>,
    cancel: &CancellationToken,
) -> StreamEnd {
    let mut delivered = false;
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(event)) => {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return StreamEnd::Cancelled,
                    sent = tx.send(TransportMessage::Event(event)) => sent,
                };
                if sent.is_err() {
                    return StreamEnd::ReceiverGone;
                }
                delivered = true;
            }
            Some(Err(e)) => {
                return StreamEnd::Closed {
                    delivered,
                    error: Some(e.to_string()),
                }
            }
            None => {
                return StreamEnd::Closed {
                    delivered,
                    error: None,
                }
            }
        }
    }
}
