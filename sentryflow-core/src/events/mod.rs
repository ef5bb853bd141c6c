//! C2 — bounded event ring buffer, the `network_status_update` splitting
//! rule, `flow_update` defaulting, and UI WebSocket fan-out.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use sentryflow_model::{Event, EventLog, EventType, Severity};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::EventLogStore;

const METRIC_FIELDS: [&str; 3] = ["cpu_usage", "memory_usage", "network_throughput"];

/// Process-wide bounded event history plus a broadcast fan-out to any
/// number of UI WebSocket connections. Owned by `AppState`, never a
/// process-global — fresh instances are cheap to construct in tests.
///
/// When constructed with a log store (`with_log_store`), every event that
/// survives the splitting rule is persisted in the background
/// (fire-and-forget, matching the defensive "never let a bad event kill
/// ingestion" posture of the reference event recorder) in addition to
/// being cached and broadcast.
pub struct EventCache {
    buffer: Mutex<VecDeque<Event>>,
    capacity: usize,
    sender: broadcast::Sender<Event>,
    log_store: Option<Arc<dyn EventLogStore>>,
}

impl std::fmt::Debug for EventCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCache")
            .field("capacity", &self.capacity)
            .field("len", &self.buffer.lock().len())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventCache {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            sender,
            log_store: None,
        }
    }

    pub fn with_log_store(capacity: usize, log_store: Arc<dyn EventLogStore>) -> Self {
        let mut cache = Self::new(capacity);
        cache.log_store = Some(log_store);
        cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Ingests one controller event: applies the `network_status_update`
    /// split and `flow_update` defaulting rules, appends to the ring
    /// buffer (unless fully consumed by the split), persists an
    /// `EventLog` for everything but `flow_update`, and fans out to UI
    /// subscribers. Returns the persisted log row, if any, for the caller
    /// to hand to the flow store.
    pub fn ingest(&self, mut event: Event) -> Option<EventLog> {
        if event.event_type == EventType::FlowUpdate {
            if let serde_json::Value::Object(ref mut map) = event.data {
                map.entry("detect_status")
                    .or_insert_with(|| serde_json::Value::String("pending".into()));
            }
        }

        let mut consumed_by_split = false;
        if event.event_type == EventType::NetworkStatusUpdate {
            if let serde_json::Value::Object(ref map) = event.data {
                let has_metrics = METRIC_FIELDS.iter().any(|f| map.contains_key(*f));
                if has_metrics {
                    let node_id = map.get("node_id").cloned();
                    let metrics: serde_json::Map<String, serde_json::Value> = map
                        .iter()
                        .filter(|(k, _)| METRIC_FIELDS.contains(&k.as_str()))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    let derived = Event::new(
                        EventType::NodeMetricsUpdate,
                        serde_json::json!({ "node_id": node_id, "metrics": metrics }),
                    );
                    let _ = self.sender.send(derived);

                    let remaining_keys = map
                        .keys()
                        .filter(|k| *k != "node_id" && !METRIC_FIELDS.contains(&k.as_str()))
                        .count();
                    if remaining_keys == 0 {
                        consumed_by_split = true;
                    }
                }
            }
        }

        if consumed_by_split {
            return None;
        }

        self.push(event.clone());
        let _ = self.sender.send(event.clone());

        if event.event_type == EventType::FlowUpdate {
            return None;
        }

        let log = self.to_event_log(event);
        if let Some(store) = self.log_store.clone() {
            let log = log.clone();
            tokio::spawn(async move {
                if let Err(err) = store.append(&log).await {
                    tracing::warn!(error = %err, "failed to persist event log");
                }
            });
        }
        Some(log)
    }

    fn push(&self, event: Event) {
        let mut buf = self.buffer.lock();
        buf.push_back(event);
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }

    /// Most-recent-first, optionally filtered by type, capped at `limit`.
    pub fn recent(&self, limit: usize, types: Option<&[EventType]>) -> Vec<Event> {
        let buf = self.buffer.lock();
        buf.iter()
            .rev()
            .filter(|e| types.is_none_or(|ts| ts.contains(&e.event_type)))
            .take(limit)
            .cloned()
            .collect()
    }

    fn to_event_log(&self, event: Event) -> EventLog {
        let severity = match event.event_type {
            EventType::TrafficAnomaly | EventType::HoneypotInteraction => Severity::Warning,
            EventType::FlowDetectionResult => {
                match event.data.get("detect_status").and_then(|v| v.as_str()) {
                    Some("dangerous") => Severity::High,
                    Some("suspicious") => Severity::Warning,
                    _ => Severity::Info,
                }
            }
            _ => Severity::Info,
        };

        let related_resource = match event.event_type {
            EventType::FlowUpdate | EventType::FlowDetectionResult => event
                .data
                .get("flow_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            EventType::TrafficAnomaly | EventType::HoneypotInteraction => event
                .data
                .get("node_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            EventType::TopologyChange => event
                .data
                .get("dpid")
                .and_then(|v| v.as_str())
                .map(String::from),
            _ => None,
        };

        EventLog {
            id: Uuid::new_v4(),
            event_type: event.event_type,
            severity,
            related_resource,
            data: event.data,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_is_bounded_and_fifo() {
        let cache = EventCache::new(3);
        for i in 0..5 {
            cache.ingest(Event::new(
                EventType::TopologyChange,
                serde_json::json!({ "seq": i }),
            ));
        }
        let recent = cache.recent(10, None);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].data["seq"], 4);
        assert_eq!(recent[2].data["seq"], 2);
    }

    #[test]
    fn network_status_update_splits_pure_metrics_event() {
        let cache = EventCache::new(10);
        let log = cache.ingest(Event::new(
            EventType::NetworkStatusUpdate,
            serde_json::json!({ "node_id": "n1", "cpu_usage": 0.5 }),
        ));
        assert!(log.is_none());
        assert!(cache.recent(10, None).is_empty());
    }

    #[test]
    fn network_status_update_keeps_non_metric_event_and_still_derives() {
        let cache = EventCache::new(10);
        let log = cache.ingest(Event::new(
            EventType::NetworkStatusUpdate,
            serde_json::json!({ "node_id": "n1", "cpu_usage": 0.5, "status": "up" }),
        ));
        assert!(log.is_some());
        assert_eq!(cache.recent(10, None).len(), 1);
    }

    #[test]
    fn flow_update_defaults_detect_status_and_is_not_persisted() {
        let cache = EventCache::new(10);
        let log = cache.ingest(Event::new(
            EventType::FlowUpdate,
            serde_json::json!({ "flow_id": "f1" }),
        ));
        assert!(log.is_none());
        let recent = cache.recent(10, None);
        assert_eq!(recent[0].data["detect_status"], "pending");
    }
}
