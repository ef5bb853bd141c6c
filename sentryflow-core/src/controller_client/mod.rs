//! C7 — REST client for the SDN controller: token lifecycle, generic
//! envelope-aware request helper, and typed per-resource methods.
//!
//! Shaped after a provider client that wraps one shared `reqwest::Client`
//! behind a small number of thin typed methods built on a single generic
//! JSON-fetch helper, with a dedicated error enum distinguishing transport
//! failure from API-reported failure.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sentryflow_model::Policy;
use tokio::sync::Mutex;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// Token freshness (P10): a token within 60s of expiry is treated as
    /// stale and refreshed before use.
    fn needs_refresh(&self) -> bool {
        self.expires_at - Utc::now() < chrono::Duration::seconds(60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub nodes: Vec<TopologyNode>,
    #[serde(default)]
    pub links: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPolicy {
    pub name: String,
    pub priority: i64,
    pub conditions: sentryflow_model::PolicyConditions,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_params: Option<serde_json::Value>,
}

#[async_trait::async_trait]
pub trait ControllerClient: Send + Sync {
    async fn get_topology(&self) -> Result<Topology>;
    async fn list_policies(&self) -> Result<Vec<Policy>>;
    async fn create_policy(&self, policy: NewPolicy) -> Result<Policy>;
    async fn apply_policy(&self, policy_id: &str, target_flows: &[String]) -> Result<()>;
    async fn revoke_policy(&self, policy_id: &str) -> Result<()>;
    async fn get_alerts(&self) -> Result<serde_json::Value>;
    async fn get_honeypot_logs(&self) -> Result<serde_json::Value>;
}

struct TokenState {
    pair: Option<TokenPair>,
}

/// REST client for the controller's token-protected API. One instance is
/// shared (behind an `Arc`) across the detection pipeline and REST
/// handlers; the token mutex serializes refreshes so concurrent callers
/// never race on the same `TokenPair`.
pub struct HttpControllerClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<TokenState>,
}

impl HttpControllerClient {
    pub fn new(base_url: impl Into<String>, client_id: String, client_secret: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builder should never fail with no custom TLS config");
        Self {
            http,
            base_url: base_url.into(),
            client_id,
            client_secret,
            token: Mutex::new(TokenState { pair: None }),
        }
    }

    async fn ensure_token(&self) -> Result<String> {
        let mut state = self.token.lock().await;
        let needs_refresh = match &state.pair {
            Some(pair) => pair.needs_refresh(),
            None => true,
        };
        if needs_refresh {
            let pair = self.obtain_token().await?;
            state.pair = Some(pair);
        }
        Ok(state.pair.as_ref().unwrap().access_token.clone())
    }

    async fn obtain_token(&self) -> Result<TokenPair> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            refresh_token: String,
            expires_in: i64,
        }
        let resp = self
            .http
            .post(format!("{}/auth/token", self.base_url))
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
            }))
            .send()
            .await
            .map_err(CoreError::Transport)?;

        if !resp.status().is_success() {
            return Err(CoreError::AuthenticationFailure(format!(
                "token request failed with status {}",
                resp.status()
            )));
        }

        let body: TokenResponse = resp.json().await.map_err(CoreError::Transport)?;
        Ok(TokenPair {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in),
        })
    }

    /// Generic envelope-aware JSON request, with a single retry after a
    /// fresh token on 401 — the controller API may reply either with a
    /// bare JSON body or `{code, message, metadata, data}`; the `data`
    /// field is unwrapped when present.
    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        match self.try_request(method.clone(), path, body).await {
            Ok(value) => Ok(value),
            Err(CoreError::AuthenticationFailure(_)) => {
                {
                    let mut state = self.token.lock().await;
                    state.pair = None;
                }
                self.try_request(method, path, body).await
            }
            Err(err) => Err(err),
        }
    }

    async fn try_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let token = self.ensure_token().await?;
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(CoreError::Transport)?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(CoreError::AuthenticationFailure(
                "controller rejected access token".into(),
            ));
        }
        if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
            return Err(CoreError::ControllerUnavailable(format!(
                "controller returned {status}"
            )));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CoreError::Internal(format!(
                "controller request failed ({status}): {text}"
            )));
        }

        let mut value: serde_json::Value = resp.json().await.map_err(CoreError::Transport)?;
        if let serde_json::Value::Object(ref map) = value {
            if let Some(data) = map.get("data") {
                value = data.clone();
            }
        }
        serde_json::from_value(value).map_err(CoreError::Serde)
    }
}

#[async_trait::async_trait]
impl ControllerClient for HttpControllerClient {
    async fn get_topology(&self) -> Result<Topology> {
        self.request_json(Method::GET, "/topology", None).await
    }

    async fn list_policies(&self) -> Result<Vec<Policy>> {
        self.request_json(Method::GET, "/policies", None).await
    }

    async fn create_policy(&self, policy: NewPolicy) -> Result<Policy> {
        let body = serde_json::to_value(&policy).map_err(CoreError::Serde)?;
        self.request_json(Method::POST, "/policies", Some(&body))
            .await
    }

    async fn apply_policy(&self, policy_id: &str, target_flows: &[String]) -> Result<()> {
        let body = serde_json::json!({ "target_flows": target_flows });
        let _: serde_json::Value = self
            .request_json(
                Method::POST,
                &format!("/policies/{policy_id}/apply"),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    async fn revoke_policy(&self, policy_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .request_json(Method::POST, &format!("/policies/{policy_id}/revoke"), None)
            .await?;
        Ok(())
    }

    async fn get_alerts(&self) -> Result<serde_json::Value> {
        self.request_json(Method::GET, "/alerts", None).await
    }

    async fn get_honeypot_logs(&self) -> Result<serde_json::Value> {
        self.request_json(Method::GET, "/honeypot/logs", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_needs_refresh_within_60s_of_expiry() {
        let fresh = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(120),
        };
        assert!(!fresh.needs_refresh());

        let stale = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert!(stale.needs_refresh());
    }
}
