//! C4 — whitelist pre-filtering, feature synthesis, and classifier scoring.
//!
//! The whitelist pre-filter (steps 3-4 of `predict_flow`) runs ahead of
//! the model call: low packet rate, low entropy, low address-register
//! variance short-circuits to a pre-classified low-severity result
//! without ever touching the classifier.

use std::collections::HashMap;
use std::path::Path;

use sentryflow_model::{DecisionLevel, Flow};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Mirrors `sentryflow_config::ThresholdConfig` but is owned by this crate
/// so inference has no compile-time dependency on env-var parsing.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdConfig {
    pub alert: f64,
    pub throttle: f64,
    pub block: f64,
    pub redirect: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            alert: 0.3,
            throttle: 0.6,
            block: 0.8,
            redirect: 0.9,
        }
    }
}

impl ThresholdConfig {
    /// Highest decision level whose threshold `prob` meets or exceeds,
    /// else `Normal`. Thresholds form a total order, so this is monotonic
    /// in `prob` by construction (P3).
    pub fn decision_level(&self, prob: f64) -> DecisionLevel {
        if prob >= self.redirect {
            DecisionLevel::Redirect
        } else if prob >= self.block {
            DecisionLevel::Block
        } else if prob >= self.throttle {
            DecisionLevel::Throttle
        } else if prob >= self.alert {
            DecisionLevel::Alert
        } else {
            DecisionLevel::Normal
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub feature_columns: Vec<String>,
    pub label_mapping: HashMap<String, String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            feature_columns: vec![
                "duration".into(),
                "pkt_count".into(),
                "byte_count".into(),
                "pkt_rate".into(),
                "byte_rate".into(),
            ],
            label_mapping: HashMap::from([
                ("0".to_string(), "Normal".to_string()),
                ("1".to_string(), "Attack".to_string()),
            ]),
        }
    }
}

/// A minimal linear-classifier artifact: one weight vector and bias per
/// class, scored over `feature_order` and turned into a probability
/// distribution via softmax. This is a deliberate, documented substitution
/// for the heavier model format training scripts would normally produce —
/// see DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    pub feature_order: Vec<String>,
    pub classes: Vec<String>,
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl ClassifierArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| CoreError::ModelError(format!("reading {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes).map_err(CoreError::Serde)
    }

    /// Positive-class index, used to extract a scalar probability from a
    /// multi-class softmax output. Falls back to the last class.
    fn positive_index(&self) -> usize {
        self.classes
            .iter()
            .position(|c| c.eq_ignore_ascii_case("attack") || c == "1")
            .unwrap_or(self.classes.len().saturating_sub(1))
    }

    fn score(&self, features: &[f64]) -> (f64, String) {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(self.bias.iter())
            .map(|(w, b)| w.iter().zip(features).map(|(wi, xi)| wi * xi).sum::<f64>() + b)
            .collect();

        let max_logit = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|l| (l - max_logit).exp()).collect();
        let sum: f64 = exps.iter().sum();
        let probs: Vec<f64> = exps.iter().map(|e| e / sum).collect();

        let argmax = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let label = self
            .classes
            .get(argmax)
            .cloned()
            .unwrap_or_else(|| "Unknown".into());

        let prob = if probs.len() == 2 {
            probs[self.positive_index()]
        } else {
            probs[argmax]
        };

        (prob, label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prob: f64,
    pub label: String,
    /// Mirrors `prob` for an actual model call; `0.0` for every
    /// whitelist/no-model/error short-circuit, matching the reference
    /// inference service this is grounded on.
    pub anomaly_score: f64,
    pub decision_level: DecisionLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMeta {
    pub is_loaded: bool,
    pub feature_columns: Vec<String>,
    pub classes: Vec<String>,
}

/// Owns the loaded artifacts and runs the whitelist-then-model prediction
/// pipeline. Constructed once and shared via `AppState`; `load` can be
/// called again to hot-swap artifacts (tests build fresh instances instead
/// of relying on a module-level singleton).
pub struct InferenceService {
    classifier: Option<ClassifierArtifact>,
    features: FeatureConfig,
    thresholds: ThresholdConfig,
}

impl InferenceService {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            classifier: None,
            features: FeatureConfig::default(),
            thresholds,
        }
    }

    /// Loads the classifier, feature, and threshold artifacts from disk.
    /// A missing file at any of the three paths falls back to the built-in
    /// default for that artifact rather than failing startup.
    pub fn load(&mut self, model_path: &Path, features_path: &Path) -> Result<()> {
        match ClassifierArtifact::load(model_path) {
            Ok(artifact) => self.classifier = Some(artifact),
            Err(err) => {
                tracing::warn!(error = %err, path = %model_path.display(), "classifier artifact not loaded, predictions will use whitelist/default path only");
            }
        }

        if let Ok(bytes) = std::fs::read(features_path) {
            match serde_json::from_slice::<FeatureConfig>(&bytes) {
                Ok(cfg) => self.features = cfg,
                Err(err) => tracing::warn!(error = %err, "invalid feature config, using defaults"),
            }
        }

        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn meta(&self) -> ModelMeta {
        ModelMeta {
            is_loaded: self.is_loaded(),
            feature_columns: self.features.feature_columns.clone(),
            classes: self
                .classifier
                .as_ref()
                .map(|c| c.classes.clone())
                .unwrap_or_default(),
        }
    }

    /// Step 1 — synthesize the training-schema feature vector from a flow,
    /// including the heuristic `sSynRate` derivation.
    fn build_feature_vector(&self, flow: &Flow) -> HashMap<String, f64> {
        let mut features = HashMap::new();
        features.insert("duration".to_string(), flow.duration.unwrap_or(0.0));
        features.insert(
            "pkt_count".to_string(),
            flow.pkt_count.unwrap_or(0) as f64,
        );
        features.insert(
            "byte_count".to_string(),
            flow.byte_count.unwrap_or(0) as f64,
        );
        let pkt_rate = flow.pkt_rate.unwrap_or(0.0);
        let byte_rate = flow.byte_rate.unwrap_or(0.0);
        features.insert("pkt_rate".to_string(), pkt_rate);
        features.insert("byte_rate".to_string(), byte_rate);

        let syn_rate = if pkt_rate > 1000.0 && pkt_rate > 0.0 && (byte_rate / pkt_rate) < 120.0 {
            1.0
        } else {
            0.0
        };
        features.insert("sSynRate".to_string(), syn_rate);

        for column in &self.features.feature_columns {
            features.entry(column.clone()).or_insert(0.0);
        }

        features
    }

    /// Runs the full whitelist-then-model pipeline for one flow (§4.4).
    pub fn predict_flow(&self, flow: &Flow) -> PredictionResult {
        let pkt_rate = flow.pkt_rate.unwrap_or(0.0);
        let func_code_entropy = flow.func_code_entropy.unwrap_or(1.0);
        let reg_addr_std = flow.reg_addr_std.unwrap_or(1000.0);

        // Step 3: smart low-rate whitelist.
        if pkt_rate < 5.0 && func_code_entropy < 0.1 && reg_addr_std < 5.0 {
            return PredictionResult {
                prob: 0.01,
                label: "Normal".into(),
                anomaly_score: 0.0,
                decision_level: DecisionLevel::Normal,
            };
        }

        // Step 4: insufficient-data whitelist.
        if flow.pkt_count.is_none() {
            if pkt_rate <= 1000.0 {
                return PredictionResult {
                    prob: 0.0,
                    label: "Normal".into(),
                    anomaly_score: 0.0,
                    decision_level: DecisionLevel::Normal,
                };
            }
            // pkt_rate > 1000 with no pkt_count: fall through to the model,
            // the rate alone is a signal worth scoring.
        }

        let Some(classifier) = &self.classifier else {
            return PredictionResult {
                prob: 0.0,
                label: "Error".into(),
                anomaly_score: 0.0,
                decision_level: DecisionLevel::Normal,
            };
        };

        let features = self.build_feature_vector(flow);
        let vector: Vec<f64> = classifier
            .feature_order
            .iter()
            .map(|f| *features.get(f).unwrap_or(&0.0))
            .collect();

        if vector.len() != classifier.feature_order.len()
            || classifier.weights.iter().any(|w| w.len() != vector.len())
        {
            tracing::error!("classifier feature shape mismatch");
            return PredictionResult {
                prob: 0.0,
                label: "Error".into(),
                anomaly_score: 0.0,
                decision_level: DecisionLevel::Normal,
            };
        }

        let (prob, label) = classifier.score(&vector);
        let decision_level = self.thresholds.decision_level(prob);

        PredictionResult {
            prob,
            label,
            anomaly_score: prob,
            decision_level,
        }
    }

    pub fn predict_batch(&self, flows: &[Flow]) -> Vec<PredictionResult> {
        flows.iter().map(|f| self.predict_flow(f)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_flow() -> Flow {
        Flow {
            flow_id: "f1".into(),
            src_ip: None,
            dst_ip: None,
            src_mac: None,
            dst_mac: None,
            protocol: None,
            src_port: None,
            dst_port: None,
            dpid: None,
            duration: Some(1.0),
            pkt_count: Some(10),
            byte_count: Some(1000),
            pkt_rate: Some(10.0),
            byte_rate: Some(1000.0),
            func_code_entropy: Some(0.5),
            reg_addr_std: Some(10.0),
            detect_status: sentryflow_model::DetectStatus::Pending,
            decision_level: None,
            prob: None,
            anomaly_score: None,
            detected_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn low_rate_low_entropy_low_std_is_whitelisted() {
        let svc = InferenceService::new(ThresholdConfig::default());
        let mut flow = base_flow();
        flow.pkt_rate = Some(1.0);
        flow.func_code_entropy = Some(0.01);
        flow.reg_addr_std = Some(1.0);
        let result = svc.predict_flow(&flow);
        assert_eq!(result.decision_level, DecisionLevel::Normal);
        assert_eq!(result.label, "Normal");
    }

    #[test]
    fn low_rate_but_elevated_entropy_is_not_whitelisted_falls_to_no_model_error() {
        let svc = InferenceService::new(ThresholdConfig::default());
        let mut flow = base_flow();
        flow.pkt_rate = Some(1.0);
        flow.func_code_entropy = Some(0.5);
        let result = svc.predict_flow(&flow);
        // No classifier loaded: falls through to the "Error" no-model path,
        // proving the low-rate branch alone did not short-circuit it.
        assert_eq!(result.label, "Error");
    }

    #[test]
    fn missing_pkt_count_with_low_rate_is_whitelisted() {
        let svc = InferenceService::new(ThresholdConfig::default());
        let mut flow = base_flow();
        flow.pkt_count = None;
        flow.pkt_rate = Some(500.0);
        flow.func_code_entropy = Some(0.5);
        let result = svc.predict_flow(&flow);
        assert_eq!(result.prob, 0.0);
        assert_eq!(result.decision_level, DecisionLevel::Normal);
    }

    #[test]
    fn missing_pkt_count_with_high_rate_proceeds_to_model_path() {
        let svc = InferenceService::new(ThresholdConfig::default());
        let mut flow = base_flow();
        flow.pkt_count = None;
        flow.pkt_rate = Some(5000.0);
        flow.func_code_entropy = Some(0.9);
        flow.reg_addr_std = Some(900.0);
        let result = svc.predict_flow(&flow);
        // No classifier loaded, so this should hit the "no model" error
        // path rather than the insufficient-data whitelist.
        assert_eq!(result.label, "Error");
    }

    #[test]
    fn threshold_ladder_is_monotonic() {
        let t = ThresholdConfig::default();
        assert_eq!(t.decision_level(0.0), DecisionLevel::Normal);
        assert_eq!(t.decision_level(0.3), DecisionLevel::Alert);
        assert_eq!(t.decision_level(0.6), DecisionLevel::Throttle);
        assert_eq!(t.decision_level(0.8), DecisionLevel::Block);
        assert_eq!(t.decision_level(0.95), DecisionLevel::Redirect);
    }
}
