use super::ensemble::{EnsemblePredictor, WeightedMember};
use super::onnx_predictor::OnnxPredictor;
use super::smartcore_predictor::SmartCorePredictor;
use crate::domain::ml::{DummyModel, FeatureCatalog, Predictor};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Which tier a loaded model belongs to, in descending preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLevel {
    Stacking,
    Full,
    Basic,
    Rebuilt,
    Dummy,
}

impl ModelLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelLevel::Stacking => "stacking",
            ModelLevel::Full => "full",
            ModelLevel::Basic => "basic",
            ModelLevel::Rebuilt => "rebuilt",
            ModelLevel::Dummy => "dummy",
        }
    }
}

/// Chooses one of five tiers, falling through to the next when a manifest
/// entry is absent or its artifact file is missing. `rebuilt` has no
/// manifest entry of its own; it reuses the `basic` feature count against a
/// caller-supplied rebuilt artifact path.
pub struct MLLoader {
    model_dir: PathBuf,
    stacking_enabled: bool,
}

impl MLLoader {
    pub fn new(model_dir: impl Into<PathBuf>, stacking_enabled: bool) -> Self {
        Self {
            model_dir: model_dir.into(),
            stacking_enabled,
        }
    }

    fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.model_dir.join(file_name)
    }

    /// Selects and loads a predictor following the tiered fallback chain.
    /// Always succeeds: the last tier is `DummyModel`, which never fails.
    pub fn load(&self, catalog: &FeatureCatalog) -> (Box<dyn Predictor>, ModelLevel) {
        if self.stacking_enabled && catalog.has_stacking()
            && let Some(level) = catalog.level("stacking")
        {
            let path = self.artifact_path(&level.model_file);
            if path.exists() {
                info!("loading stacking ensemble from {:?}", path);
                return (
                    Box::new(OnnxPredictor::load(path, level.count, "stacking")),
                    ModelLevel::Stacking,
                );
            }
            warn!("stacking declared but artifact missing, falling back to full");
        }

        if let Some(level) = catalog.level("full") {
            let path = self.artifact_path(&level.model_file);
            if path.exists() {
                info!("loading full ensemble from {:?}", path);
                let primary: Box<dyn Predictor> =
                    Box::new(OnnxPredictor::load(path, level.count, "full-primary"));
                let predictor = match (&level.secondary_model_file, level.primary_weight) {
                    (Some(secondary_file), Some(primary_weight)) => {
                        let secondary_path = self.artifact_path(secondary_file);
                        if secondary_path.exists() {
                            info!(
                                "combining full ensemble with secondary base learner from {:?}",
                                secondary_path
                            );
                            let secondary: Box<dyn Predictor> = Box::new(SmartCorePredictor::load(
                                secondary_path,
                                level.count,
                                "full-secondary",
                            ));
                            Box::new(EnsemblePredictor::new(
                                "full",
                                vec![
                                    WeightedMember { predictor: primary, weight: primary_weight },
                                    WeightedMember { predictor: secondary, weight: 1.0 - primary_weight },
                                ],
                                level.count,
                            )) as Box<dyn Predictor>
                        } else {
                            warn!("secondary base learner artifact missing, using primary only");
                            primary
                        }
                    }
                    _ => primary,
                };
                return (predictor, ModelLevel::Full);
            }
            warn!("full ensemble declared but artifact missing, falling back to basic");
        }

        if let Some(level) = catalog.level("basic") {
            let path = self.artifact_path(&level.model_file);
            if !level.model_file.is_empty() && path.exists() {
                info!("loading basic ensemble from {:?}", path);
                return (
                    Box::new(SmartCorePredictor::load(path, level.count, "basic")),
                    ModelLevel::Basic,
                );
            }
            warn!("basic ensemble artifact missing, attempting rebuild path");
            let rebuilt_path = self.artifact_path("rebuilt.json");
            if rebuilt_path.exists() {
                info!("loading rebuilt ensemble from {:?}", rebuilt_path);
                return (
                    Box::new(SmartCorePredictor::load(rebuilt_path, level.count, "rebuilt")),
                    ModelLevel::Rebuilt,
                );
            }
        }

        warn!("no ensemble artifact available at any tier, using DummyModel");
        (Box::new(DummyModel), ModelLevel::Dummy)
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}
