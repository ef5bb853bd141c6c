//! C6 — auto-responder: once-per-flow gated synthesis and application of a
//! mitigating policy when a flow is judged `block` or `redirect`.

use std::sync::Arc;

use dashmap::DashSet;
use sentryflow_model::{DecisionLevel, Event, EventType, Flow, PolicyConditions};

use crate::controller_client::{ControllerClient, NewPolicy};
use crate::events::EventCache;

/// Process-local once-per-flow idempotency gate plus the honeypot-aware
/// action selection and policy synthesis described in §4.6.
pub struct Responder {
    responded: DashSet<String>,
    controller: Arc<dyn ControllerClient>,
    events: Arc<EventCache>,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("responded_count", &self.responded.len())
            .finish()
    }
}

impl Responder {
    pub fn new(controller: Arc<dyn ControllerClient>, events: Arc<EventCache>) -> Self {
        Self {
            responded: DashSet::new(),
            controller,
            events,
        }
    }

    /// Responds to one dangerous flow. No-op if this `flow_id` has already
    /// been responded to in this process's lifetime (P2). Any failure
    /// after the gate rolls the gate back so a later retry is possible.
    pub async fn respond(&self, flow_id: &str, flow: &Flow, decision_level: DecisionLevel) {
        if !self.responded.insert(flow_id.to_string()) {
            return;
        }

        if let Err(err) = self.try_respond(flow_id, flow, decision_level).await {
            tracing::warn!(flow_id, error = %err, "auto-responder failed, rolling back gate");
            self.responded.remove(flow_id);
        }
    }

    async fn try_respond(
        &self,
        flow_id: &str,
        flow: &Flow,
        decision_level: DecisionLevel,
    ) -> crate::error::Result<()> {
        let honeypot_ip = self.find_honeypot().await;

        let (action, redirect_to) = match (decision_level, &honeypot_ip) {
            (DecisionLevel::Redirect, Some(ip)) => ("redirect", Some(ip.clone())),
            (DecisionLevel::Redirect, None) => ("block", None),
            (DecisionLevel::Block, _) => ("block", None),
            _ => return Ok(()),
        };

        let conditions = PolicyConditions {
            src_ip: flow.src_ip.clone(),
            dst_ip: flow.dst_ip.clone(),
            protocol: flow.protocol.clone(),
            dst_port: flow.dst_port.map(|p| serde_json::json!(p)),
            ..Default::default()
        };

        let short_id: String = flow_id.chars().take(8).collect();
        let name = format!("Auto-{}-{}", action.to_ascii_uppercase(), short_id);

        let action_params = redirect_to.as_ref().map(|ip| {
            serde_json::json!({
                "primary_action": {
                    "action_type": "redirect",
                    "action_params": { "targets": [{ "ip": ip }] }
                }
            })
        });

        let policy = self
            .controller
            .create_policy(NewPolicy {
                name,
                priority: 100,
                conditions,
                action: action.to_string(),
                action_params,
            })
            .await?;

        self.controller
            .apply_policy(&policy.id, std::slice::from_ref(&flow_id.to_string()))
            .await?;

        let event_type = if action == "redirect" {
            EventType::TrafficRedirect
        } else {
            EventType::TrafficBlock
        };
        let mut data = serde_json::json!({
            "flow_id": flow_id,
            "policy_id": policy.id,
            "reason": format!("decision_level={decision_level:?}"),
        });
        if let Some(ip) = &redirect_to {
            data["redirect_to"] = serde_json::json!(ip);
        }
        self.events.ingest(Event::new(event_type, data));

        Ok(())
    }

    async fn find_honeypot(&self) -> Option<String> {
        let topology = self.controller.get_topology().await.ok()?;
        topology
            .nodes
            .into_iter()
            .find(|n| n.node_type == "honeypot" && n.ip.as_deref().is_some_and(|ip| !ip.is_empty()))
            .and_then(|n| n.ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller_client::Topology;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeController {
        topology: Topology,
        create_calls: AtomicUsize,
        fail_apply: bool,
    }

    #[async_trait]
    impl ControllerClient for FakeController {
        async fn get_topology(&self) -> crate::error::Result<Topology> {
            Ok(self.topology.clone())
        }
        async fn list_policies(&self) -> crate::error::Result<Vec<sentryflow_model::Policy>> {
            Ok(vec![])
        }
        async fn create_policy(&self, policy: NewPolicy) -> crate::error::Result<sentryflow_model::Policy> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            Ok(sentryflow_model::Policy {
                id: "p1".into(),
                name: policy.name,
                priority: policy.priority,
                status: sentryflow_model::PolicyStatus::Active,
                scope: Default::default(),
                conditions: policy.conditions,
                action: Some(policy.action),
                actions: None,
                metadata: Default::default(),
            })
        }
        async fn apply_policy(&self, _id: &str, _targets: &[String]) -> crate::error::Result<()> {
            if self.fail_apply {
                Err(crate::error::CoreError::ControllerUnavailable("down".into()))
            } else {
                Ok(())
            }
        }
        async fn revoke_policy(&self, _id: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn get_alerts(&self) -> crate::error::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn get_honeypot_logs(&self) -> crate::error::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn flow() -> Flow {
        Flow {
            flow_id: "flow-123".into(),
            src_ip: Some("10.0.0.1".into()),
            dst_ip: Some("10.0.0.2".into()),
            src_mac: None,
            dst_mac: None,
            protocol: Some("tcp".into()),
            src_port: None,
            dst_port: Some(502),
            dpid: None,
            duration: None,
            pkt_count: None,
            byte_count: None,
            pkt_rate: None,
            byte_rate: None,
            func_code_entropy: None,
            reg_addr_std: None,
            detect_status: sentryflow_model::DetectStatus::Pending,
            decision_level: None,
            prob: None,
            anomaly_score: None,
            detected_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn responds_only_once_per_flow_id() {
        let controller = Arc::new(FakeController {
            topology: Topology { nodes: vec![], links: vec![] },
            create_calls: AtomicUsize::new(0),
            fail_apply: false,
        });
        let events = Arc::new(EventCache::new(10));
        let responder = Responder::new(controller.clone(), events);

        responder.respond("flow-123", &flow(), DecisionLevel::Block).await;
        responder.respond("flow-123", &flow(), DecisionLevel::Block).await;

        assert_eq!(controller.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redirect_without_honeypot_downgrades_to_block() {
        let controller = Arc::new(FakeController {
            topology: Topology { nodes: vec![], links: vec![] },
            create_calls: AtomicUsize::new(0),
            fail_apply: false,
        });
        let events = Arc::new(EventCache::new(10));
        let responder = Responder::new(controller, events);

        responder.respond("flow-xyz", &flow(), DecisionLevel::Redirect).await;
        let recent = responder.events.recent(10, Some(&[EventType::TrafficBlock]));
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn failed_apply_rolls_back_gate_allowing_retry() {
        let controller = Arc::new(FakeController {
            topology: Topology { nodes: vec![], links: vec![] },
            create_calls: AtomicUsize::new(0),
            fail_apply: true,
        });
        let events = Arc::new(EventCache::new(10));
        let responder = Responder::new(controller.clone(), events);

        responder.respond("flow-abc", &flow(), DecisionLevel::Block).await;
        responder.respond("flow-abc", &flow(), DecisionLevel::Block).await;

        assert_eq!(controller.create_calls.load(Ordering::SeqCst), 2);
    }
}
