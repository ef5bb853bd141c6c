//! C8 — controller-side policy store and packet-matching algorithm.
//!
//! Matching semantics (condition checks, ACL remote-IP selection, priority
//! resolution, action extraction/normalization) are transcribed from the
//! reference policy module this is grounded on; see DESIGN.md for the
//! priority-tie decision.

use std::collections::HashMap;

use parking_lot::RwLock;
use sentryflow_model::{ActionKind, ActionParams, Policy, PolicyStatus, RedirectTarget};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// A fully-resolved packet description, pre-extracted from whatever wire
/// format the data-plane side uses.
#[derive(Debug, Clone, Default)]
pub struct PacketContext {
    pub dpid: Option<String>,
    pub src_mac: Option<String>,
    pub dst_mac: Option<String>,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub protocol: Option<String>,
    pub dst_port: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub action: ActionKind,
    pub reason: Option<String>,
    pub params: ActionParams,
}

impl MatchResult {
    fn allow() -> Self {
        Self {
            action: ActionKind::Allow,
            reason: None,
            params: ActionParams::default(),
        }
    }
}

/// In-memory policy table, keyed by id, iterated in insertion order for
/// matching (insertion order is the tie-break for equal-priority matches —
/// see DESIGN.md open question #1).
pub struct PolicyStore {
    policies: RwLock<Vec<Policy>>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(Vec::new()),
        }
    }

    pub fn create(&self, mut policy: Policy) -> Policy {
        if policy.id.is_empty() {
            policy.id = format!("policy_{}", &Uuid::new_v4().simple().to_string()[..8]);
        }
        policy.status = PolicyStatus::Active;
        self.policies.write().push(policy.clone());
        policy
    }

    pub fn get(&self, id: &str) -> Option<Policy> {
        self.policies.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn update(&self, id: &str, policy: Policy) -> Result<Policy> {
        let mut policies = self.policies.write();
        let slot = policies
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("policy {id}")))?;
        *slot = policy.clone();
        Ok(policy)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut policies = self.policies.write();
        let before = policies.len();
        policies.retain(|p| p.id != id);
        if policies.len() == before {
            return Err(CoreError::NotFound(format!("policy {id}")));
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<Policy> {
        self.policies.read().clone()
    }

    /// Evaluates `ctx` against every active policy and returns the
    /// resolved action of the highest-priority match. Ties keep the first
    /// (lowest-insertion-index) match, matching the strict `>` comparison
    /// of the reference implementation. No match returns `allow`.
    pub fn check_packet(&self, ctx: &PacketContext) -> MatchResult {
        let policies = self.policies.read();
        let mut best: Option<(&Policy, i64, bool)> = None; // (policy, priority, is_acl_block)

        for policy in policies.iter() {
            if policy.status != PolicyStatus::Active {
                continue;
            }
            let Some(is_acl_block) = matches_policy(policy, ctx) else {
                continue;
            };

            let matched_priority = policy.priority;
            let take = match &best {
                None => true,
                Some((_, best_priority, _)) => matched_priority > *best_priority,
            };
            if take {
                best = Some((policy, matched_priority, is_acl_block));
            }
        }

        let Some((policy, _, is_acl_block)) = best else {
            return MatchResult::allow();
        };

        if is_acl_block {
            return MatchResult {
                action: ActionKind::Drop,
                reason: Some(format!("policy {} denied by ACL", policy.id)),
                params: ActionParams::default(),
            };
        }

        extract_action(policy)
    }
}

/// Returns `Some(false)` for an ordinary field-condition match,
/// `Some(true)` for a match resolved via ACL-deny (so the caller can
/// short-circuit straight to `drop` per P6), or `None` for no match.
fn matches_policy(policy: &Policy, ctx: &PacketContext) -> Option<bool> {
    let target_id: Option<String> = policy.scope.target_id.clone().or_else(|| {
        policy
            .metadata
            .get("target_id")
            .and_then(|v| v.as_str())
            .map(String::from)
    });
    if let Some(target_id) = &target_id {
        let is_src = ctx.src_mac.as_deref() == Some(target_id.as_str());
        let is_dst = ctx.dst_mac.as_deref() == Some(target_id.as_str());
        if !is_src && !is_dst {
            return None;
        }
    }

    let c = &policy.conditions;
    if let Some(v) = &c.src_ip {
        if ctx.src_ip.as_deref() != Some(v.as_str()) {
            return None;
        }
    }
    if let Some(v) = &c.dst_ip {
        if ctx.dst_ip.as_deref() != Some(v.as_str()) {
            return None;
        }
    }
    if let Some(v) = &c.src_mac {
        if ctx.src_mac.as_deref() != Some(v.as_str()) {
            return None;
        }
    }
    if let Some(v) = &c.dst_mac {
        if ctx.dst_mac.as_deref() != Some(v.as_str()) {
            return None;
        }
    }
    if let Some(v) = &c.protocol {
        let matches = ctx
            .protocol
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(v));
        if !matches {
            return None;
        }
    }
    if let Some(v) = &c.dst_port {
        let want = parse_port(v);
        if want.is_none() || want != ctx.dst_port {
            return None;
        }
    }

    if c.allowed_ips.is_some() || c.denied_ips.is_some() {
        let target_id = target_id.as_deref();
        let remote_ips: Vec<&str> = if target_id.is_some() && target_id == ctx.src_mac.as_deref() {
            ctx.dst_ip.iter().map(|s| s.as_str()).collect()
        } else if target_id.is_some() && target_id == ctx.dst_mac.as_deref() {
            ctx.src_ip.iter().map(|s| s.as_str()).collect()
        } else {
            [ctx.src_ip.as_deref(), ctx.dst_ip.as_deref()]
                .into_iter()
                .flatten()
                .collect()
        };

        if let Some(denied) = &c.denied_ips {
            if remote_ips.iter().any(|ip| denied.iter().any(|d| d == ip)) {
                return Some(true);
            }
        }
        if let Some(allowed) = &c.allowed_ips {
            let in_allowed = remote_ips.iter().any(|ip| allowed.iter().any(|a| a == ip));
            if !in_allowed {
                return Some(true);
            }
        }
        // Remote IP is not denied (or there is no denied_ips list) and is
        // either absent from a check or present in allowed_ips: the ACL
        // clause itself does not produce a match (§4.8 step 3, "else
        // policy does not match").
        return None;
    }

    Some(false)
}

fn parse_port(v: &serde_json::Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    v.as_str().and_then(|s| s.parse().ok())
}

fn extract_action(policy: &Policy) -> MatchResult {
    let (action_type, action_params) = if let Some(flat) = &policy.action {
        (flat.clone(), serde_json::Value::Null)
    } else if let Some(actions) = &policy.actions {
        (
            actions.primary_action.action_type.clone(),
            actions.primary_action.action_params.clone(),
        )
    } else {
        return MatchResult::allow();
    };

    let kind = ActionKind::from_wire(&action_type);
    let mut params = ActionParams::default();

    match kind {
        ActionKind::Throttle => {
            params.rate_limit = action_params
                .get("rate_limit")
                .and_then(|v| v.as_f64())
                .or_else(|| policy.metadata.get("rate_limit").and_then(|v| v.as_f64()));
        }
        ActionKind::Redirect => {
            if let Some(targets) = action_params.get("targets").and_then(|v| v.as_array()) {
                params.targets = Some(
                    targets
                        .iter()
                        .filter_map(|t| {
                            let ip = t.get("ip")?.as_str()?.to_string();
                            let port = t.get("port").and_then(|p| p.as_u64()).map(|p| p as u16);
                            Some(RedirectTarget { ip, port })
                        })
                        .collect(),
                );
            } else if let Some(legacy) = policy
                .metadata
                .get("redirect_target")
                .and_then(|v| v.as_str())
            {
                params.targets = Some(vec![RedirectTarget {
                    ip: legacy.to_string(),
                    port: None,
                }]);
            }
        }
        _ => {}
    }

    MatchResult {
        action: kind,
        reason: Some(format!("policy {} matched", policy.id)),
        params,
    }
}

/// CRC32-of-`src-dst-dpid` meter id, constrained to `[1, 0xFFFF]` per the
/// throttle action's documented formula. Pure formula only — installing
/// the meter is an out-of-scope, controller-side concern.
pub fn meter_id(src_ip: &str, dst_ip: &str, dpid: &str) -> u32 {
    let key = format!("{src_ip}-{dst_ip}-{dpid}");
    let crc = crc32fast::hash(key.as_bytes());
    (crc % 0xFFFF) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentryflow_model::{Policy, PolicyConditions, PolicyScope, PolicyStatus};
    use std::collections::HashMap as Map;

    fn base_policy(id: &str, priority: i64) -> Policy {
        Policy {
            id: id.into(),
            name: id.into(),
            priority,
            status: PolicyStatus::Active,
            scope: PolicyScope::default(),
            conditions: PolicyConditions::default(),
            action: Some("allow".into()),
            actions: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn no_match_returns_allow() {
        let store = PolicyStore::new();
        let result = store.check_packet(&PacketContext::default());
        assert_eq!(result.action, ActionKind::Allow);
    }

    #[test]
    fn higher_priority_wins() {
        let store = PolicyStore::new();
        let mut low = base_policy("low", 10);
        low.action = Some("drop".into());
        let mut high = base_policy("high", 20);
        high.action = Some("allow".into());
        store.create(low);
        store.create(high);

        let result = store.check_packet(&PacketContext::default());
        assert_eq!(result.action, ActionKind::Allow);
    }

    #[test]
    fn equal_priority_keeps_first_inserted() {
        let store = PolicyStore::new();
        let mut first = base_policy("first", 10);
        first.action = Some("drop".into());
        let mut second = base_policy("second", 10);
        second.action = Some("allow".into());
        store.create(first);
        store.create(second);

        let result = store.check_packet(&PacketContext::default());
        assert_eq!(result.action, ActionKind::Drop);
    }

    #[test]
    fn denied_ip_dominates_allowed_ip() {
        let store = PolicyStore::new();
        let mut policy = base_policy("acl", 5);
        policy.conditions.allowed_ips = Some(vec!["10.0.0.5".into()]);
        policy.conditions.denied_ips = Some(vec!["10.0.0.5".into()]);
        store.create(policy);

        let ctx = PacketContext {
            src_ip: Some("10.0.0.5".into()),
            dst_ip: Some("10.0.0.9".into()),
            ..Default::default()
        };
        let result = store.check_packet(&ctx);
        assert_eq!(result.action, ActionKind::Drop);
    }

    #[test]
    fn allowed_ip_does_not_itself_match_a_lower_priority_policy_wins() {
        // A higher-priority allow-list policy whose remote IP is allowed
        // must not itself resolve to a match (§4.8 step 3: "else policy
        // does not match") -- it should simply step aside and let a lower-
        // priority, otherwise-matching policy decide the packet.
        let store = PolicyStore::new();
        let mut allow_listed = base_policy("acl", 100);
        allow_listed.conditions.allowed_ips = Some(vec!["10.0.0.5".into()]);
        allow_listed.action = Some("allow".into());
        store.create(allow_listed);

        let mut blocker = base_policy("blocker", 50);
        blocker.conditions.dst_ip = Some("10.0.0.9".into());
        blocker.action = Some("block".into());
        store.create(blocker);

        let ctx = PacketContext {
            src_ip: Some("10.0.0.5".into()),
            dst_ip: Some("10.0.0.9".into()),
            ..Default::default()
        };
        let result = store.check_packet(&ctx);
        assert_eq!(result.action, ActionKind::Drop);
    }

    #[test]
    fn protocol_match_is_case_insensitive() {
        let store = PolicyStore::new();
        let mut policy = base_policy("proto", 5);
        policy.conditions.protocol = Some("TCP".into());
        policy.action = Some("drop".into());
        store.create(policy);

        let ctx = PacketContext {
            protocol: Some("tcp".into()),
            ..Default::default()
        };
        assert_eq!(store.check_packet(&ctx).action, ActionKind::Drop);
    }

    #[test]
    fn meter_id_is_within_bounds() {
        let id = meter_id("10.0.0.1", "10.0.0.2", "dpid-1");
        assert!(id >= 1 && id <= 0xFFFF);
    }
}
