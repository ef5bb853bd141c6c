use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detection status as shown to operators.
///
/// `Pending` is the state an ingested flow starts in; `Safe`/`Suspicious`/
/// `Dangerous` are the three operator-facing buckets a decision level maps
/// to; `Error`/`Skipped` cover classifier failure and whitelist short-circuit
/// respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectStatus {
    Pending,
    Safe,
    Suspicious,
    Dangerous,
    Error,
    Skipped,
}

/// Five-valued severity derived from classifier output via thresholds.
///
/// Ordered so `Normal < Alert < Throttle < Block < Redirect` — threshold
/// monotonicity (P3) depends on this derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLevel {
    Normal,
    Alert,
    Throttle,
    Block,
    Redirect,
}

impl DecisionLevel {
    /// Maps a decision level to the three-valued operator status (P4).
    pub fn to_detect_status(self) -> DetectStatus {
        match self {
            DecisionLevel::Normal => DetectStatus::Safe,
            DecisionLevel::Alert => DetectStatus::Suspicious,
            DecisionLevel::Throttle | DecisionLevel::Block | DecisionLevel::Redirect => {
                DetectStatus::Dangerous
            }
        }
    }
}

impl Default for DecisionLevel {
    fn default() -> Self {
        DecisionLevel::Normal
    }
}

/// A directional conversation between two endpoints, summarized by counters
/// and rates over a window.
///
/// Fields are split into ingestion-owned (set by `flow_update` events) and
/// detection-owned (set only by the inference pipeline) — P1 depends on
/// ingestion never touching the latter group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: String,

    // --- ingestion-owned ---
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub src_mac: Option<String>,
    pub dst_mac: Option<String>,
    pub protocol: Option<String>,
    pub src_port: Option<i32>,
    pub dst_port: Option<i32>,
    pub dpid: Option<String>,
    pub duration: Option<f64>,
    pub pkt_count: Option<i64>,
    pub byte_count: Option<i64>,
    pub pkt_rate: Option<f64>,
    pub byte_rate: Option<f64>,
    pub func_code_entropy: Option<f64>,
    pub reg_addr_std: Option<f64>,

    // --- detection-owned ---
    pub detect_status: DetectStatus,
    pub decision_level: Option<DecisionLevel>,
    pub prob: Option<f64>,
    pub anomaly_score: Option<f64>,
    pub detected_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of classifier output recorded alongside a flow's detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDetectionLog {
    pub id: uuid::Uuid,
    pub flow_id: String,
    pub label: String,
    pub prob: f64,
    pub decision_level: DecisionLevel,
    pub detected_at: DateTime<Utc>,
}
