use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One entry of `feature_levels` in the manifest: an ordered feature list
/// plus the artifact file that was trained against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureLevel {
    pub count: usize,
    pub model_file: String,
    #[serde(default)]
    pub description: String,
    pub features: Vec<String>,
    /// A second base learner's artifact to combine with `model_file` via
    /// weighted-average ensembling (spec'd only for the "full" level). Absent
    /// for manifests that export a single pre-combined artifact per level.
    #[serde(default)]
    pub secondary_model_file: Option<String>,
    /// Weight assigned to `model_file` when `secondary_model_file` is
    /// present; the secondary learner gets `1.0 - primary_weight`.
    #[serde(default)]
    pub primary_weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCategory {
    pub features: Vec<String>,
}

/// Raw shape of the on-disk manifest JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCatalogManifest {
    pub total_features: usize,
    pub feature_levels: HashMap<String, FeatureLevel>,
    #[serde(default)]
    pub feature_categories: HashMap<String, FeatureCategory>,
}

/// The 15-feature baseline used when no manifest is present on disk.
/// Mirrors the minimal feature set a bare momentum/volatility strategy
/// would need; never extended beyond what `DummyModel` degrades to anyway.
fn fallback_features() -> Vec<String> {
    vec![
        "rsi_14", "macd", "macd_signal", "adx_14", "plus_di_14", "minus_di_14", "atr_14",
        "ema_20", "ema_50", "bb_width", "volume_ratio", "price_change_pct", "high_low_ratio",
        "close_open_ratio", "obv_slope",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Process-cached view over the feature manifest. Built once at startup by
/// `MLLoader` and handed to `MLAdapter` for feature-count validation.
#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    levels: HashMap<String, FeatureLevel>,
    categories: HashMap<String, FeatureCategory>,
}

impl FeatureCatalog {
    pub fn from_manifest(manifest: FeatureCatalogManifest) -> Self {
        Self {
            levels: manifest.feature_levels,
            categories: manifest.feature_categories,
        }
    }

    /// Hard-coded baseline used when the manifest file is missing or
    /// unparseable: a single "basic" level with 15 features.
    pub fn fallback() -> Self {
        let features = fallback_features();
        let mut levels = HashMap::new();
        levels.insert(
            "basic".to_string(),
            FeatureLevel {
                count: features.len(),
                model_file: String::new(),
                description: "hard-coded baseline".to_string(),
                features,
                secondary_model_file: None,
                primary_weight: None,
            },
        );
        Self {
            levels,
            categories: HashMap::new(),
        }
    }

    pub fn level(&self, name: &str) -> Option<&FeatureLevel> {
        self.levels.get(name)
    }

    pub fn levels(&self) -> impl Iterator<Item = (&String, &FeatureLevel)> {
        self.levels.iter()
    }

    pub fn has_stacking(&self) -> bool {
        self.levels.contains_key("stacking")
    }

    pub fn feature_names(&self, level: &str) -> Option<&[String]> {
        self.levels.get(level).map(|l| l.features.as_slice())
    }

    pub fn count(&self, level: &str) -> Option<usize> {
        self.levels.get(level).map(|l| l.count)
    }

    pub fn categories(&self) -> &HashMap<String, FeatureCategory> {
        &self.categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_catalog_has_fifteen_basic_features() {
        let catalog = FeatureCatalog::fallback();
        assert_eq!(catalog.count("basic"), Some(15));
        assert!(!catalog.has_stacking());
    }

    #[test]
    fn manifest_json_with_secondary_learner_deserializes() {
        let raw = r#"{
            "total_features": 55,
            "feature_levels": {
                "full": {
                    "count": 55,
                    "model_file": "full_primary.onnx",
                    "secondary_model_file": "full_secondary.json",
                    "primary_weight": 0.7,
                    "features": ["f1", "f2"]
                }
            }
        }"#;
        let manifest: FeatureCatalogManifest = serde_json::from_str(raw).unwrap();
        let catalog = FeatureCatalog::from_manifest(manifest);
        let full = catalog.level("full").unwrap();
        assert_eq!(full.secondary_model_file.as_deref(), Some("full_secondary.json"));
        assert_eq!(full.primary_weight, Some(0.7));
    }

    #[test]
    fn manifest_json_without_secondary_learner_defaults_to_none() {
        let raw = r#"{
            "total_features": 15,
            "feature_levels": {
                "basic": {
                    "count": 15,
                    "model_file": "basic.json",
                    "features": ["f1"]
                }
            }
        }"#;
        let manifest: FeatureCatalogManifest = serde_json::from_str(raw).unwrap();
        let catalog = FeatureCatalog::from_manifest(manifest);
        let basic = catalog.level("basic").unwrap();
        assert!(basic.secondary_model_file.is_none());
        assert!(basic.primary_weight.is_none());
    }
}
