//! Route composition: one `Router<AppState>` builder per resource group,
//! merged into a single top-level router nested under `/api`, plus the
//! bare `/healthz` and `/ui-events` endpoints that sit outside that prefix.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{alerts, detect, events, health, honeypot, model, policies, stubs, topology};
use crate::state::AppState;
use crate::ws::ui_events_handler;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/ui-events", get(ui_events_handler))
        .nest("/api", create_api_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(create_auth_routes())
        .merge(create_topology_routes())
        .merge(create_policy_routes())
        .merge(create_detection_routes())
        .merge(create_alert_and_honeypot_routes())
        .merge(create_event_routes())
        .merge(create_audit_and_preference_routes())
        .with_state(state)
}

/// RBAC login/me — out of scope (§1), wired as 501 stubs so the route
/// table in §6 is complete without reimplementing the subsystem.
fn create_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(stubs::login_stub))
        .route("/auth/me", get(stubs::me_stub))
}

fn create_topology_routes() -> Router<AppState> {
    Router::new().route("/topology", get(topology::get_topology))
}

fn create_policy_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/policies",
            get(policies::list_policies).post(policies::create_policy),
        )
        .route("/policies/{id}", get(policies::get_policy))
        .route("/policies/{id}/apply", post(policies::apply_policy))
        .route("/policies/{id}/revoke", post(policies::revoke_policy))
}

fn create_detection_routes() -> Router<AppState> {
    Router::new()
        .route("/detect/flow", post(detect::ingest_flow))
        .route("/detect/batch", post(detect::ingest_batch))
        .route("/model/meta", get(model::get_model_meta))
}

fn create_alert_and_honeypot_routes() -> Router<AppState> {
    Router::new()
        .route("/alerts", get(alerts::get_alerts))
        .route("/honeypot/logs", get(honeypot::get_honeypot_logs))
}

fn create_event_routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(events::recent_events))
        .route("/events/logs", get(events::event_logs))
}

/// Audit trail and per-user preferences — out of scope (§1); wired as 501
/// stubs for the same reason as `create_auth_routes`.
fn create_audit_and_preference_routes() -> Router<AppState> {
    Router::new()
        .route("/audit", get(stubs::audit_list_stub))
        .route("/audit/export", get(stubs::audit_export_stub))
        .route(
            "/preferences/{key}",
            get(stubs::get_preference_stub).put(stubs::put_preference_stub),
        )
}
