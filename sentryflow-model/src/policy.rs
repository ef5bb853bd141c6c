use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a policy in the controller's policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    Inactive,
}

/// The scope a policy is pinned to: when `target_id` is set, the policy
/// only matches packets where that MAC is either the source or destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
}

/// Per-field match conditions, plus the two ACL list forms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Accepted as either a JSON number or numeric string on the wire; the
    /// matching algorithm parses `dst_port` to an integer before comparing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_ips: Option<Vec<String>>,
}

/// One target of a `redirect` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Normalized action kind, after synonym mapping (`deny`/`block`/`drop`
/// collapse to `Drop`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Allow,
    Drop,
    Throttle,
    Redirect,
    Log,
    Inspect,
    Isolate,
}

impl ActionKind {
    /// Normalizes the free-form action-type strings the wire schema allows
    /// (`deny`, `block`, `drop` are synonyms for `Drop`; anything
    /// unrecognized falls back to `Allow`).
    pub fn from_wire(s: &str) -> ActionKind {
        match s.to_ascii_lowercase().as_str() {
            "deny" | "block" | "drop" => ActionKind::Drop,
            "throttle" => ActionKind::Throttle,
            "redirect" => ActionKind::Redirect,
            "log" => ActionKind::Log,
            "inspect" => ActionKind::Inspect,
            "isolate" => ActionKind::Isolate,
            _ => ActionKind::Allow,
        }
    }
}

/// Resolved action parameters after extraction/normalization (§4.8 step 5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<RedirectTarget>>,
}

/// The nested `actions.primary_action` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryAction {
    pub action_type: String,
    #[serde(default)]
    pub action_params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actions {
    pub primary_action: PrimaryAction,
}

/// The controller's policy wire DTO (§6). This crate never persists a
/// `Policy` row of its own — policies are exclusively owned by the
/// controller process and only ever round-tripped through the REST client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub priority: i64,
    pub status: PolicyStatus,
    #[serde(default)]
    pub scope: PolicyScope,
    #[serde(default)]
    pub conditions: PolicyConditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Actions>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
