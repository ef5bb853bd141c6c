use axum::extract::{Query, State};
use axum::Json;
use sentryflow_model::{Event, EventLog, EventType, Severity};
use serde::Deserialize;

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecentEventsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    event_type: Option<String>,
}

fn default_limit() -> usize {
    50
}

pub async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<RecentEventsQuery>,
) -> Json<Vec<Event>> {
    let types = query
        .event_type
        .as_deref()
        .and_then(parse_event_type)
        .map(|t| vec![t]);
    Json(state.events.recent(query.limit, types.as_deref()))
}

#[derive(Debug, Deserialize)]
pub struct EventLogQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_per_page")]
    per_page: u32,
    #[serde(default, rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    resource: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    50
}

fn parse_severity(s: &str) -> Option<Severity> {
    Some(match s {
        "info" => Severity::Info,
        "warning" => Severity::Warning,
        "high" => Severity::High,
        _ => return None,
    })
}

/// Caps `per_page` at 200 regardless of what the caller asked for — the
/// store trusts this clamp rather than re-checking it itself.
pub async fn event_logs(
    State(state): State<AppState>,
    Query(query): Query<EventLogQuery>,
) -> Result<Json<Vec<EventLog>>, AppError> {
    let per_page = query.per_page.min(200).max(1);
    let event_type = query.event_type.as_deref().and_then(parse_event_type);
    let severity = query.severity.as_deref().and_then(parse_severity);
    let logs = state
        .event_log_store
        .list(
            query.page.max(1),
            per_page,
            event_type,
            severity,
            query.resource.as_deref(),
        )
        .await?;
    Ok(Json(logs))
}

fn parse_event_type(s: &str) -> Option<EventType> {
    Some(match s {
        "network_status_update" => EventType::NetworkStatusUpdate,
        "node_metrics_update" => EventType::NodeMetricsUpdate,
        "traffic_anomaly" => EventType::TrafficAnomaly,
        "honeypot_interaction" => EventType::HoneypotInteraction,
        "topology_change" => EventType::TopologyChange,
        "flow_update" => EventType::FlowUpdate,
        "flow_detection_result" => EventType::FlowDetectionResult,
        "traffic_block" => EventType::TrafficBlock,
        "traffic_redirect" => EventType::TrafficRedirect,
        _ => return None,
    })
}
