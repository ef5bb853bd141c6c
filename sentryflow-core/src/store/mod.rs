//! C3 — flow persistence. `upsert_flow_base` is an atomic
//! `INSERT ... ON CONFLICT DO UPDATE` restricted to ingestion-owned columns
//! (P1); `update_detection` only ever writes detection-owned columns.

pub mod event_log;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use sentryflow_model::{DecisionLevel, DetectStatus, Flow, FlowDetectionLog};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{CoreError, Result};

pub use event_log::{EventLogStore, PostgresEventLogStore};

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
    ) || matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("40001") || db.code().as_deref() == Some("55P03"))
}

fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(std::time::Duration::from_millis(100))
        .with_max_times(5)
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn upsert_flow_base(&self, flow: &Flow) -> Result<()>;
    async fn update_detection(
        &self,
        flow_id: &str,
        decision_level: DecisionLevel,
        prob: f64,
        anomaly_score: Option<f64>,
    ) -> Result<()>;
    async fn append_detection_log(&self, log: &FlowDetectionLog) -> Result<()>;
    async fn get_flow(&self, flow_id: &str) -> Result<Option<Flow>>;
}

#[derive(Clone)]
pub struct PostgresFlowStore {
    pool: PgPool,
}

impl PostgresFlowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlowStore for PostgresFlowStore {
    async fn upsert_flow_base(&self, flow: &Flow) -> Result<()> {
        let pool = self.pool.clone();
        let flow = flow.clone();
        (move || {
            let pool = pool.clone();
            let flow = flow.clone();
            async move {
                sqlx::query!(
                    r#"
                    INSERT INTO flows (
                        flow_id, src_ip, dst_ip, src_mac, dst_mac, protocol,
                        src_port, dst_port, dpid, duration, pkt_count,
                        byte_count, pkt_rate, byte_rate, func_code_entropy,
                        reg_addr_std, detect_status, created_at, updated_at
                    ) VALUES (
                        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                        $13, $14, $15, $16, 'pending', $17, $17
                    )
                    ON CONFLICT (flow_id) DO UPDATE SET
                        src_ip = excluded.src_ip,
                        dst_ip = excluded.dst_ip,
                        src_mac = excluded.src_mac,
                        dst_mac = excluded.dst_mac,
                        protocol = excluded.protocol,
                        src_port = excluded.src_port,
                        dst_port = excluded.dst_port,
                        dpid = excluded.dpid,
                        duration = excluded.duration,
                        pkt_count = excluded.pkt_count,
                        byte_count = excluded.byte_count,
                        pkt_rate = excluded.pkt_rate,
                        byte_rate = excluded.byte_rate,
                        func_code_entropy = excluded.func_code_entropy,
                        reg_addr_std = excluded.reg_addr_std,
                        updated_at = excluded.updated_at
                    "#,
                    flow.flow_id,
                    flow.src_ip,
                    flow.dst_ip,
                    flow.src_mac,
                    flow.dst_mac,
                    flow.protocol,
                    flow.src_port,
                    flow.dst_port,
                    flow.dpid,
                    flow.duration,
                    flow.pkt_count,
                    flow.byte_count,
                    flow.pkt_rate,
                    flow.byte_rate,
                    flow.func_code_entropy,
                    flow.reg_addr_std,
                    Utc::now(),
                )
                .execute(&pool)
                .await
            }
        })
        .retry(retry_policy())
        .when(|e| is_transient(e))
        .await
        .map_err(|e| {
            if is_transient(&e) {
                CoreError::TransientStorageLockExhausted(e.to_string())
            } else {
                CoreError::Storage(e)
            }
        })?;
        Ok(())
    }

    async fn update_detection(
        &self,
        flow_id: &str,
        decision_level: DecisionLevel,
        prob: f64,
        anomaly_score: Option<f64>,
    ) -> Result<()> {
        let detect_status = detect_status_label(decision_level.to_detect_status());
        let decision_label = decision_level_label(decision_level);
        let now = Utc::now();
        sqlx::query!(
            r#"
            UPDATE flows SET
                detect_status = $2,
                decision_level = $3,
                prob = $4,
                anomaly_score = $5,
                detected_at = $6
            WHERE flow_id = $1
            "#,
            flow_id,
            detect_status,
            decision_label,
            prob,
            anomaly_score,
            now,
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::Storage)?;
        Ok(())
    }

    async fn append_detection_log(&self, log: &FlowDetectionLog) -> Result<()> {
        let decision_label = decision_level_label(log.decision_level);
        sqlx::query!(
            r#"
            INSERT INTO flow_detection_logs
                (id, flow_id, label, prob, decision_level, detected_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            log.id,
            log.flow_id,
            log.label,
            log.prob,
            decision_label,
            log.detected_at,
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::Storage)?;
        Ok(())
    }

    async fn get_flow(&self, flow_id: &str) -> Result<Option<Flow>> {
        let row = sqlx::query!(
            r#"
            SELECT flow_id, src_ip, dst_ip, src_mac, dst_mac, protocol,
                   src_port, dst_port, dpid, duration, pkt_count, byte_count,
                   pkt_rate, byte_rate, func_code_entropy, reg_addr_std,
                   detect_status, decision_level, prob, anomaly_score,
                   detected_at, created_at, updated_at
            FROM flows WHERE flow_id = $1
            "#,
            flow_id
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Storage)?;

        let Some(row) = row else { return Ok(None) };

        Ok(Some(Flow {
            flow_id: row.flow_id,
            src_ip: row.src_ip,
            dst_ip: row.dst_ip,
            src_mac: row.src_mac,
            dst_mac: row.dst_mac,
            protocol: row.protocol,
            src_port: row.src_port,
            dst_port: row.dst_port,
            dpid: row.dpid,
            duration: row.duration,
            pkt_count: row.pkt_count,
            byte_count: row.byte_count,
            pkt_rate: row.pkt_rate,
            byte_rate: row.byte_rate,
            func_code_entropy: row.func_code_entropy,
            reg_addr_std: row.reg_addr_std,
            detect_status: parse_detect_status(&row.detect_status),
            decision_level: row.decision_level.as_deref().map(parse_decision_level),
            prob: row.prob,
            anomaly_score: row.anomaly_score,
            detected_at: row.detected_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }
}

fn detect_status_label(status: DetectStatus) -> &'static str {
    match status {
        DetectStatus::Pending => "pending",
        DetectStatus::Safe => "safe",
        DetectStatus::Suspicious => "suspicious",
        DetectStatus::Dangerous => "dangerous",
        DetectStatus::Error => "error",
        DetectStatus::Skipped => "skipped",
    }
}

fn decision_level_label(level: DecisionLevel) -> &'static str {
    match level {
        DecisionLevel::Normal => "normal",
        DecisionLevel::Alert => "alert",
        DecisionLevel::Throttle => "throttle",
        DecisionLevel::Block => "block",
        DecisionLevel::Redirect => "redirect",
    }
}

fn parse_detect_status(s: &str) -> DetectStatus {
    match s {
        "safe" => DetectStatus::Safe,
        "suspicious" => DetectStatus::Suspicious,
        "dangerous" => DetectStatus::Dangerous,
        "error" => DetectStatus::Error,
        "skipped" => DetectStatus::Skipped,
        _ => DetectStatus::Pending,
    }
}

fn parse_decision_level(s: &str) -> DecisionLevel {
    match s {
        "alert" => DecisionLevel::Alert,
        "throttle" => DecisionLevel::Throttle,
        "block" => DecisionLevel::Block,
        "redirect" => DecisionLevel::Redirect,
        _ => DecisionLevel::Normal,
    }
}
