//! Persistence for the `EventLog` rows `EventCache::ingest` produces.
//! Kept separate from `FlowStore` since it is queried independently
//! (paginated, filterable) by the `/api/events/logs` handler.

use async_trait::async_trait;
use sentryflow_model::{EventLog, EventType, Severity};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{CoreError, Result};

#[async_trait]
pub trait EventLogStore: Send + Sync {
    async fn append(&self, log: &EventLog) -> Result<()>;
    async fn list(
        &self,
        page: u32,
        per_page: u32,
        event_type: Option<EventType>,
        severity: Option<Severity>,
        related_resource: Option<&str>,
    ) -> Result<Vec<EventLog>>;
}

#[derive(Clone)]
pub struct PostgresEventLogStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct EventLogRow {
    id: uuid::Uuid,
    event_type: String,
    severity: String,
    related_resource: Option<String>,
    data: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl PostgresEventLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn event_type_label(t: EventType) -> &'static str {
    match t {
        EventType::NetworkStatusUpdate => "network_status_update",
        EventType::NodeMetricsUpdate => "node_metrics_update",
        EventType::TrafficAnomaly => "traffic_anomaly",
        EventType::HoneypotInteraction => "honeypot_interaction",
        EventType::TopologyChange => "topology_change",
        EventType::FlowUpdate => "flow_update",
        EventType::FlowDetectionResult => "flow_detection_result",
        EventType::TrafficBlock => "traffic_block",
        EventType::TrafficRedirect => "traffic_redirect",
    }
}

fn severity_label(s: Severity) -> &'static str {
    match s {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::High => "high",
    }
}

#[async_trait]
impl EventLogStore for PostgresEventLogStore {
    async fn append(&self, log: &EventLog) -> Result<()> {
        sqlx::query!(
            r#"
            INSERT INTO event_logs (id, event_type, severity, related_resource, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            log.id,
            event_type_label(log.event_type),
            severity_label(log.severity),
            log.related_resource,
            log.data,
            log.created_at,
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::Storage)?;
        Ok(())
    }

    async fn list(
        &self,
        page: u32,
        per_page: u32,
        event_type: Option<EventType>,
        severity: Option<Severity>,
        related_resource: Option<&str>,
    ) -> Result<Vec<EventLog>> {
        // Pagination clamp (`per_page <= 200`) is enforced by the caller
        // (the REST handler); this layer trusts the values it receives.
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT id, event_type, severity, related_resource, data, created_at
            FROM event_logs
            WHERE 1=1
            "#,
        );

        if let Some(event_type) = event_type {
            builder.push(" AND event_type = ");
            builder.push_bind(event_type_label(event_type));
        }
        if let Some(severity) = severity {
            builder.push(" AND severity = ");
            builder.push_bind(severity_label(severity));
        }
        if let Some(related_resource) = related_resource {
            builder.push(" AND related_resource = ");
            builder.push_bind(related_resource.to_string());
        }

        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(per_page as i64);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let rows = builder
            .build_query_as::<EventLogRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::Storage)?;

        Ok(rows
            .into_iter()
            .map(|r| EventLog {
                id: r.id,
                event_type: parse_event_type(&r.event_type),
                severity: parse_severity(&r.severity),
                related_resource: r.related_resource,
                data: r.data,
                created_at: r.created_at,
            })
            .collect())
    }
}

fn parse_event_type(s: &str) -> EventType {
    match s {
        "node_metrics_update" => EventType::NodeMetricsUpdate,
        "traffic_anomaly" => EventType::TrafficAnomaly,
        "honeypot_interaction" => EventType::HoneypotInteraction,
        "topology_change" => EventType::TopologyChange,
        "flow_update" => EventType::FlowUpdate,
        "flow_detection_result" => EventType::FlowDetectionResult,
        "traffic_block" => EventType::TrafficBlock,
        "traffic_redirect" => EventType::TrafficRedirect,
        _ => EventType::NetworkStatusUpdate,
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "warning" => Severity::Warning,
        "high" => Severity::High,
        _ => Severity::Info,
    }
}
