//! C5 — bounded, batching, de-duplicating detection pipeline: one
//! dispatcher task pulls a batch off the queue (a head element plus
//! whatever else is immediately available, up to `batch_size`), collapses
//! duplicate `flow_id`s within the batch keeping the last observation, and
//! hands the batch to a worker drawn from a bounded concurrency pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sentryflow_model::{DecisionLevel, DetectStatus, Event, EventType, Flow, FlowDetectionLog};
use tokio::sync::{mpsc, watch, Semaphore};
use uuid::Uuid;

use crate::events::EventCache;
use crate::inference::InferenceService;
use crate::responder::Responder;
use crate::store::FlowStore;

#[derive(Debug, Clone)]
pub struct FlowTask {
    pub flow_id: String,
    pub snapshot: Flow,
}

pub struct PipelineConfig {
    pub queue_depth: usize,
    pub worker_count: usize,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 10_000,
            worker_count: 4,
            batch_size: 64,
        }
    }
}

fn map_decision_to_status(level: DecisionLevel) -> DetectStatus {
    level.to_detect_status()
}

/// Owns the bounded queue and the dispatcher/worker-pool lifecycle. Built
/// once from `AppState`; `stop` is idempotent and safe to call from a
/// shutdown handler.
pub struct DetectionPipeline {
    sender: mpsc::Sender<FlowTask>,
    stop_tx: watch::Sender<bool>,
    dispatcher: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    dropped_full: Arc<std::sync::atomic::AtomicU64>,
}

impl std::fmt::Debug for DetectionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionPipeline")
            .field("dropped_full", &self.dropped_full.load(Ordering::Relaxed))
            .finish()
    }
}

impl DetectionPipeline {
    pub fn start(
        config: PipelineConfig,
        store: Arc<dyn FlowStore>,
        inference: Arc<InferenceService>,
        events: Arc<EventCache>,
        responder: Arc<Responder>,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.queue_depth);
        let (stop_tx, stop_rx) = watch::channel(false);
        let dropped_full = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let semaphore = Arc::new(Semaphore::new(config.worker_count));
        let batch_size = config.batch_size;

        let handle = tokio::spawn(dispatcher_loop(
            receiver, stop_rx, semaphore, batch_size, store, inference, events, responder,
        ));

        Arc::new(Self {
            sender,
            stop_tx,
            dispatcher: tokio::sync::Mutex::new(Some(handle)),
            dropped_full,
        })
    }

    /// Non-blocking enqueue (P8). On a full queue the task is dropped and a
    /// warning logged; no backpressure reaches the caller.
    pub fn handle_flow_event(&self, flow: Flow) {
        let task = FlowTask {
            flow_id: flow.flow_id.clone(),
            snapshot: flow,
        };
        if let Err(mpsc::error::TrySendError::Full(task)) = self.sender.try_send(task) {
            self.dropped_full.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(flow_id = %task.flow_id, "detection queue full, dropping flow task");
        }
    }

    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.dispatcher.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_full.load(Ordering::Relaxed)
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatcher_loop(
    mut receiver: mpsc::Receiver<FlowTask>,
    mut stop_rx: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
    batch_size: usize,
    store: Arc<dyn FlowStore>,
    inference: Arc<InferenceService>,
    events: Arc<EventCache>,
    responder: Arc<Responder>,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() { return; }
                continue;
            }
            task = receiver.recv() => match task {
                Some(t) => t,
                None => return,
            },
        };

        let mut batch = vec![first];
        while batch.len() < batch_size {
            match receiver.try_recv() {
                Ok(t) => batch.push(t),
                Err(_) => break,
            }
        }

        let batch = dedup_by_flow_id(batch);

        let permit = Arc::clone(&semaphore).acquire_owned().await;
        let Ok(permit) = permit else { return };
        let store = Arc::clone(&store);
        let inference = Arc::clone(&inference);
        let events = Arc::clone(&events);
        let responder = Arc::clone(&responder);

        tokio::spawn(async move {
            let _permit = permit;
            process_batch(batch, store, inference, events, responder).await;
        });
    }
}

/// Collapses a batch to one task per `flow_id`, keeping the last
/// observation — bounds per-flow work per dispatch cycle (P7).
fn dedup_by_flow_id(batch: Vec<FlowTask>) -> Vec<FlowTask> {
    let mut by_id: HashMap<String, FlowTask> = HashMap::with_capacity(batch.len());
    for task in batch {
        by_id.insert(task.flow_id.clone(), task);
    }
    by_id.into_values().collect()
}

async fn process_batch(
    batch: Vec<FlowTask>,
    store: Arc<dyn FlowStore>,
    inference: Arc<InferenceService>,
    events: Arc<EventCache>,
    responder: Arc<Responder>,
) {
    for task in &batch {
        if let Err(err) = store.upsert_flow_base(&task.snapshot).await {
            tracing::error!(flow_id = %task.flow_id, error = %err, "upsert_flow_base failed");
        }
    }

    let flows: Vec<Flow> = batch.iter().map(|t| t.snapshot.clone()).collect();
    let results = inference.predict_batch(&flows);

    for (task, result) in batch.into_iter().zip(results.into_iter()) {
        let status = map_decision_to_status(result.decision_level);

        if let Err(err) = store
            .update_detection(
                &task.flow_id,
                result.decision_level,
                result.prob,
                Some(result.anomaly_score),
            )
            .await
        {
            tracing::error!(flow_id = %task.flow_id, error = %err, "update_detection failed");
        }

        let log = FlowDetectionLog {
            id: Uuid::new_v4(),
            flow_id: task.flow_id.clone(),
            label: result.label.clone(),
            prob: result.prob,
            decision_level: result.decision_level,
            detected_at: chrono::Utc::now(),
        };
        if let Err(err) = store.append_detection_log(&log).await {
            tracing::error!(flow_id = %task.flow_id, error = %err, "append_detection_log failed");
        }

        let should_emit = matches!(status, DetectStatus::Suspicious | DetectStatus::Dangerous)
            || result.prob > 0.1;
        if should_emit {
            events.ingest(Event::new(
                EventType::FlowDetectionResult,
                serde_json::json!({
                    "flow_id": task.flow_id,
                    "detect_status": status_label(status),
                    "decision_level": level_label(result.decision_level),
                    "prob": result.prob,
                    "label": result.label,
                }),
            ));
        }

        if matches!(result.decision_level, DecisionLevel::Block | DecisionLevel::Redirect) {
            let responder = Arc::clone(&responder);
            let flow_id = task.flow_id.clone();
            let snapshot = task.snapshot.clone();
            let decision_level = result.decision_level;
            tokio::spawn(async move {
                responder.respond(&flow_id, &snapshot, decision_level).await;
            });
        }
    }
}

fn status_label(status: DetectStatus) -> &'static str {
    match status {
        DetectStatus::Pending => "pending",
        DetectStatus::Safe => "safe",
        DetectStatus::Suspicious => "suspicious",
        DetectStatus::Dangerous => "dangerous",
        DetectStatus::Error => "error",
        DetectStatus::Skipped => "skipped",
    }
}

fn level_label(level: DecisionLevel) -> &'static str {
    match level {
        DecisionLevel::Normal => "normal",
        DecisionLevel::Alert => "alert",
        DecisionLevel::Throttle => "throttle",
        DecisionLevel::Block => "block",
        DecisionLevel::Redirect => "redirect",
    }
}

#[allow(dead_code)]
fn assert_send<T: Send>() {}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(id: &str) -> Flow {
        Flow {
            flow_id: id.into(),
            src_ip: None,
            dst_ip: None,
            src_mac: None,
            dst_mac: None,
            protocol: None,
            src_port: None,
            dst_port: None,
            dpid: None,
            duration: None,
            pkt_count: None,
            byte_count: None,
            pkt_rate: None,
            byte_rate: None,
            func_code_entropy: None,
            reg_addr_std: None,
            detect_status: DetectStatus::Pending,
            decision_level: None,
            prob: None,
            anomaly_score: None,
            detected_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn dedup_keeps_last_observation_per_flow_id() {
        let batch = vec![
            FlowTask { flow_id: "a".into(), snapshot: flow("a") },
            FlowTask { flow_id: "b".into(), snapshot: flow("b") },
            FlowTask { flow_id: "a".into(), snapshot: flow("a") },
        ];
        let deduped = dedup_by_flow_id(batch);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn status_mapping_matches_p4() {
        assert_eq!(map_decision_to_status(DecisionLevel::Normal), DetectStatus::Safe);
        assert_eq!(map_decision_to_status(DecisionLevel::Alert), DetectStatus::Suspicious);
        assert_eq!(map_decision_to_status(DecisionLevel::Throttle), DetectStatus::Dangerous);
        assert_eq!(map_decision_to_status(DecisionLevel::Block), DetectStatus::Dangerous);
        assert_eq!(map_decision_to_status(DecisionLevel::Redirect), DetectStatus::Dangerous);
    }
}
