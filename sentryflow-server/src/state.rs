//! Process-wide state, composed once at startup and passed to every Axum
//! handler as `State<AppState>`. No field here is a process-global: tests
//! build their own `AppState` from fresh fakes rather than resetting
//! module-level singletons.

use std::sync::Arc;

use sentryflow_config::Config;
use sentryflow_core::controller_client::ControllerClient;
use sentryflow_core::eventbus::EventBusClient;
use sentryflow_core::events::EventCache;
use sentryflow_core::inference::InferenceService;
use sentryflow_core::pipeline::DetectionPipeline;
use sentryflow_core::policy_engine::PolicyStore;
use sentryflow_core::responder::Responder;
use sentryflow_core::store::{EventLogStore, FlowStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub flow_store: Arc<dyn FlowStore>,
    pub event_log_store: Arc<dyn EventLogStore>,
    pub inference: Arc<InferenceService>,
    pub events: Arc<EventCache>,
    pub controller: Arc<dyn ControllerClient>,
    pub responder: Arc<Responder>,
    pub pipeline: Arc<DetectionPipeline>,
    pub policy_store: Arc<PolicyStore>,
    pub event_bus: Arc<EventBusClient>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
