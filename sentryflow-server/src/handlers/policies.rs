//! Policy CRUD and lifecycle, proxied straight through to the controller's
//! own policy API (C7) — this process is the controller's client here, not
//! its store; `policy_store`/C8 stays an embeddable library for a real
//! controller process to use instead.

use axum::extract::{Path, State};
use axum::Json;
use sentryflow_model::Policy;
use serde::Deserialize;
use serde_json::{json, Value};

use sentryflow_core::controller_client::NewPolicy;

use crate::errors::AppError;
use crate::state::AppState;

pub async fn list_policies(
    State(state): State<AppState>,
) -> Result<Json<Vec<Policy>>, AppError> {
    let policies = state.controller.list_policies().await?;
    Ok(Json(policies))
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub conditions: sentryflow_model::PolicyConditions,
    pub action: String,
    #[serde(default)]
    pub action_params: Option<Value>,
}

pub async fn create_policy(
    State(state): State<AppState>,
    Json(body): Json<CreatePolicyRequest>,
) -> Result<Json<Policy>, AppError> {
    let policy = state
        .controller
        .create_policy(NewPolicy {
            name: body.name,
            priority: body.priority,
            conditions: body.conditions,
            action: body.action,
            action_params: body.action_params,
        })
        .await?;
    Ok(Json(policy))
}

pub async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Policy>, AppError> {
    let policies = state.controller.list_policies().await?;
    policies
        .into_iter()
        .find(|p| p.id == id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("policy {id}")))
}

pub async fn apply_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApplyPolicyRequest>,
) -> Result<Json<Value>, AppError> {
    state.controller.apply_policy(&id, &body.target_flows).await?;
    Ok(Json(json!({ "policy_id": id, "applied": true })))
}

#[derive(Debug, Deserialize)]
pub struct ApplyPolicyRequest {
    #[serde(default)]
    pub target_flows: Vec<String>,
}

pub async fn revoke_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.controller.revoke_policy(&id).await?;
    Ok(Json(json!({ "policy_id": id, "revoked": true })))
}
