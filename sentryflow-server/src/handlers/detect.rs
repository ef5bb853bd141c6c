//! Synchronous single/batch prediction (C4), as distinct from the
//! asynchronous `flow_update` ingestion path (C5): this endpoint calls
//! `InferenceService::predict_flow`/`predict_batch` inline and returns the
//! result directly, never touching the detection queue.

use axum::extract::State;
use axum::Json;
use sentryflow_model::Flow;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    pub prob: f64,
    pub label: String,
    pub anomaly_score: f64,
    pub decision_level: String,
    pub flow_id: String,
}

fn decision_level_label(level: sentryflow_model::DecisionLevel) -> &'static str {
    use sentryflow_model::DecisionLevel::*;
    match level {
        Normal => "normal",
        Alert => "alert",
        Throttle => "throttle",
        Block => "block",
        Redirect => "redirect",
    }
}

fn to_response(flow_id: String, result: sentryflow_core::inference::PredictionResult) -> DetectionResponse {
    DetectionResponse {
        prob: result.prob,
        label: result.label,
        anomaly_score: result.anomaly_score,
        decision_level: decision_level_label(result.decision_level).to_string(),
        flow_id,
    }
}

pub async fn ingest_flow(
    State(state): State<AppState>,
    Json(flow): Json<Flow>,
) -> Json<DetectionResponse> {
    let result = state.inference.predict_flow(&flow);
    Json(to_response(flow.flow_id, result))
}

#[derive(Debug, serde::Deserialize)]
pub struct BatchDetectionRequest {
    pub flows: Vec<Flow>,
}

#[derive(Debug, Serialize)]
pub struct BatchDetectionResponse {
    pub results: Vec<DetectionResponse>,
}

pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchDetectionRequest>,
) -> Json<BatchDetectionResponse> {
    let results = state.inference.predict_batch(&body.flows);
    let flow_ids = body.flows.into_iter().map(|f| f.flow_id);
    let results = flow_ids
        .zip(results)
        .map(|(flow_id, result)| to_response(flow_id, result))
        .collect();
    Json(BatchDetectionResponse { results })
}
