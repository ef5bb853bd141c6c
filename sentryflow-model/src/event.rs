use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag distinguishing the controller-sourced event types from the
/// application-synthesized ones fanned out to UI clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NetworkStatusUpdate,
    NodeMetricsUpdate,
    TrafficAnomaly,
    HoneypotInteraction,
    TopologyChange,
    FlowUpdate,
    FlowDetectionResult,
    TrafficBlock,
    TrafficRedirect,
}

impl EventType {
    /// The controller-side WS endpoint this event type is ingested from, if
    /// any. Purely derived types (`NodeMetricsUpdate`) and
    /// application-synthesized types have no endpoint of their own.
    pub fn ws_endpoint(self) -> Option<&'static str> {
        match self {
            EventType::NetworkStatusUpdate => Some("/ws/network-status"),
            EventType::TrafficAnomaly => Some("/ws/traffic-anomalies"),
            EventType::HoneypotInteraction => Some("/ws/honeypot-alerts"),
            EventType::TopologyChange => Some("/ws/topology-changes"),
            EventType::FlowUpdate => Some("/ws/flow-updates"),
            EventType::NodeMetricsUpdate
            | EventType::FlowDetectionResult
            | EventType::TrafficBlock
            | EventType::TrafficRedirect => None,
        }
    }
}

/// Severity bucket assigned to persisted, non-`flow_update` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
}

/// A single event flowing through the ring buffer and UI fan-out.
///
/// `data` is kept as an untyped JSON object: each event type's payload
/// shape is controller-defined and this crate only inspects the handful of
/// fields the splitting/defaulting/severity rules need (see
/// `sentryflow-core::events`), never the full schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// A persisted event-log row (all non-`flow_update` events).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    pub id: uuid::Uuid,
    pub event_type: EventType,
    pub severity: Severity,
    pub related_resource: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
