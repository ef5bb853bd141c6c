//! C1 — reconnecting WebSocket subscriber to the controller's per-type event
//! endpoints, with a sequential, fault-isolated handler dispatch.
//!
//! Backoff/ping/retry constants are taken from the reference subscriber this
//! module is grounded on: 1 s base backoff doubling to a 60 s cap, 10
//! consecutive failures before giving up on an endpoint, 20 s ping interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use sentryflow_model::{Event, EventType};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 10;
const PING_INTERVAL: Duration = Duration::from_secs(20);

fn ping_timeout_error() -> tokio_tungstenite::tungstenite::Error {
    tokio_tungstenite::tungstenite::Error::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        "no pong received within ping interval",
    ))
}

/// Implemented by anything that wants to observe events of a given type.
/// Handlers are invoked sequentially in registration order on the
/// receiving task; a panicking/erroring handler must not kill the loop, so
/// `handle` takes `&self` and is expected not to propagate errors upward —
/// callers that can fail should log and swallow internally.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(Event) + Send + Sync,
{
    async fn handle(&self, event: Event) {
        (self)(event)
    }
}

/// Subscribes to the controller's per-type WebSocket endpoints and fans
/// parsed events out to registered handlers.
pub struct EventBusClient {
    ws_base_url: String,
    handlers: DashMap<EventType, Vec<Arc<dyn EventHandler>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl std::fmt::Debug for EventBusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBusClient")
            .field("ws_base_url", &self.ws_base_url)
            .field("handler_types", &self.handlers.len())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventBusClient {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            handlers: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn register_handler(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type).or_default().push(handler);
    }

    /// Starts one background task per subscribed endpoint. Idempotent: a
    /// second call while already running is a no-op.
    pub async fn start(self: &Arc<Self>, types: Option<Vec<EventType>>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let types = types.unwrap_or_else(|| {
            self.handlers.iter().map(|e| *e.key()).collect::<Vec<_>>()
        });

        let mut tasks = self.tasks.lock().await;
        for event_type in types {
            let Some(endpoint) = event_type.ws_endpoint() else {
                continue;
            };
            let url = format!("{}{}", self.ws_base_url, endpoint);
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                this.run_endpoint(event_type, url).await;
            }));
        }
    }

    /// Signals every endpoint task to stop and joins them, waiting at most
    /// 5 s total.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().await;
        let deadline = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(deadline);
        for task in tasks.drain(..) {
            tokio::select! {
                _ = task => {}
                _ = &mut deadline => {
                    tracing::warn!("event bus shutdown exceeded 5s budget");
                    break;
                }
            }
        }
    }

    async fn run_endpoint(self: Arc<Self>, event_type: EventType, url: String) {
        let mut backoff = BASE_BACKOFF;
        let mut retries: u32 = 0;

        while self.running.load(Ordering::SeqCst) {
            match self.connect_and_consume(event_type, &url).await {
                Ok(()) => {
                    // clean disconnect (server closed); reset backoff and retry
                    retries = 0;
                    backoff = BASE_BACKOFF;
                }
                Err(err) => {
                    retries += 1;
                    tracing::warn!(
                        event_type = ?event_type,
                        attempt = retries,
                        error = %err,
                        "event bus endpoint disconnected, reconnecting"
                    );
                    if retries > MAX_RETRIES {
                        tracing::error!(
                            event_type = ?event_type,
                            "event bus endpoint exceeded retry budget, giving up"
                        );
                        return;
                    }
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
        }
    }

    async fn connect_and_consume(
        &self,
        event_type: EventType,
        url: &str,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();
        // Set the instant a ping went unanswered; cleared on the matching
        // pong. A ping tick finding it still set means the prior ping got
        // no reply within one full interval, so the connection is dead.
        let mut awaiting_pong_since: Option<tokio::time::Instant> = None;

        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if let Some(since) = awaiting_pong_since {
                        tracing::warn!(
                            event_type = ?event_type,
                            elapsed_ms = since.elapsed().as_millis() as u64,
                            "no pong within ping interval, treating connection as dead"
                        );
                        return Err(ping_timeout_error());
                    }
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return Ok(());
                    }
                    awaiting_pong_since = Some(tokio::time::Instant::now());
                }
                frame = read.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    match frame {
                        Ok(Message::Text(text)) => {
                            self.dispatch(event_type, &text).await;
                        }
                        Ok(Message::Pong(_)) => {
                            awaiting_pong_since = None;
                        }
                        Ok(Message::Close(_)) => return Ok(()),
                        Ok(_) => {}
                        Err(err) => return Err(err),
                    }
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    async fn dispatch(&self, event_type: EventType, raw: &str) {
        let data: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "dropping unparsable event frame");
                return;
            }
        };
        let payload = data.get("data").cloned().unwrap_or(data);
        let event = Event {
            event_type,
            timestamp: Utc::now(),
            data: payload,
        };

        if let Some(handlers) = self.handlers.get(&event_type) {
            for handler in handlers.iter() {
                handler.handle(event.clone()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn register_handler_accumulates_per_type() {
        let client = EventBusClient::new("ws://localhost:1");
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        client.register_handler(
            EventType::FlowUpdate,
            Arc::new(move |_: Event| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(client.handlers.get(&EventType::FlowUpdate).unwrap().len(), 1);
    }
}
