//! Process entry point: loads configuration, runs migrations, composes
//! `AppState`, and serves the HTTP/WebSocket API until shut down.

mod errors;
mod handlers;
mod routes;
mod state;
mod ws;

use std::sync::Arc;

use sentryflow_config::Config;
use sentryflow_core::controller_client::HttpControllerClient;
use sentryflow_core::eventbus::EventBusClient;
use sentryflow_core::events::EventCache;
use sentryflow_core::inference::{InferenceService, ThresholdConfig as CoreThresholds};
use sentryflow_core::pipeline::{DetectionPipeline, PipelineConfig as CorePipelineConfig};
use sentryflow_core::policy_engine::PolicyStore;
use sentryflow_core::responder::Responder;
use sentryflow_core::store::{PostgresEventLogStore, PostgresFlowStore};
use sqlx::postgres::PgPoolOptions;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("../sentryflow-core/migrations").run(&pool).await?;

    let flow_store = Arc::new(PostgresFlowStore::new(pool.clone()));
    let event_log_store = Arc::new(PostgresEventLogStore::new(pool.clone()));
    let events = Arc::new(EventCache::with_log_store(
        config.event_ring_buffer_size,
        event_log_store.clone(),
    ));

    let mut inference_service = InferenceService::new(CoreThresholds {
        alert: config.thresholds.alert,
        throttle: config.thresholds.throttle,
        block: config.thresholds.block,
        redirect: config.thresholds.redirect,
    });
    inference_service.load(&config.model_path(), &config.features_path())?;
    let inference = Arc::new(inference_service);

    let controller = Arc::new(HttpControllerClient::new(
        config.controller_base_url.clone(),
        config.controller_client_id.clone(),
        config.controller_client_secret.clone(),
    ));

    let responder = Arc::new(Responder::new(controller.clone(), events.clone()));

    let pipeline = DetectionPipeline::start(
        CorePipelineConfig {
            queue_depth: config.pipeline.queue_depth,
            worker_count: config.pipeline.worker_count,
            batch_size: config.pipeline.batch_size,
        },
        flow_store.clone(),
        inference.clone(),
        events.clone(),
        responder.clone(),
    );

    let policy_store = Arc::new(PolicyStore::new());

    let event_bus = Arc::new(EventBusClient::new(config.controller_ws_base_url.clone()));
    if config.enable_controller_ws {
        register_event_bus_handlers(&event_bus, events.clone(), pipeline.clone());
        event_bus.start(None).await;
    }

    let state = AppState {
        config: config.clone(),
        flow_store,
        event_log_store,
        inference,
        events,
        controller,
        responder,
        pipeline: pipeline.clone(),
        policy_store,
        event_bus: event_bus.clone(),
    };

    let app = routes::create_router(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!(%addr, "starting sentryflow-server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.stop().await;
    event_bus.stop().await;

    Ok(())
}

fn register_event_bus_handlers(
    bus: &Arc<EventBusClient>,
    events: Arc<EventCache>,
    pipeline: Arc<DetectionPipeline>,
) {
    use sentryflow_core::eventbus::EventHandler;
    use sentryflow_model::{Event, EventType};

    struct CacheHandler {
        events: Arc<EventCache>,
    }
    #[async_trait::async_trait]
    impl EventHandler for CacheHandler {
        async fn handle(&self, event: Event) {
            self.events.ingest(event);
        }
    }

    struct FlowHandler {
        events: Arc<EventCache>,
        pipeline: Arc<DetectionPipeline>,
    }
    #[async_trait::async_trait]
    impl EventHandler for FlowHandler {
        async fn handle(&self, event: Event) {
            self.events.ingest(event.clone());
            if let Ok(flow) = serde_json::from_value::<sentryflow_model::Flow>(event.data) {
                self.pipeline.handle_flow_event(flow);
            }
        }
    }

    for event_type in [
        EventType::NetworkStatusUpdate,
        EventType::TrafficAnomaly,
        EventType::HoneypotInteraction,
        EventType::TopologyChange,
    ] {
        bus.register_handler(
            event_type,
            Arc::new(CacheHandler {
                events: events.clone(),
            }),
        );
    }

    bus.register_handler(
        EventType::FlowUpdate,
        Arc::new(FlowHandler {
            events,
            pipeline,
        }),
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
