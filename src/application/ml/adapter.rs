use super::loader::{MLLoader, ModelLevel};
use crate::domain::ml::{ClassProbabilities, DummyModel, FeatureCatalog, PredictedClass, Predictor};
use std::sync::RwLock;
use tracing::{error, warn};

/// Wraps the loaded model selected by `MLLoader`, degrading to
/// `DummyModel` whenever a call fails rather than propagating the error to
/// the evaluation pipeline. Held behind a `RwLock` so `reload_model` can
/// swap the active predictor without requiring callers to re-resolve it.
pub struct MLAdapter {
    loader: MLLoader,
    active: RwLock<(Box<dyn Predictor>, ModelLevel)>,
    catalog: FeatureCatalog,
}

impl MLAdapter {
    pub fn new(loader: MLLoader, catalog: FeatureCatalog) -> Self {
        let active = loader.load(&catalog);
        Self {
            loader,
            active: RwLock::new(active),
            catalog,
        }
    }

    pub fn active_level(&self) -> ModelLevel {
        self.active.read().unwrap().1
    }

    /// `predict(X, useConfidence=true)`. `useConfidence` is accepted for
    /// parity with the upstream signature but doesn't change behavior here:
    /// class selection is always argmax over `predict_proba`.
    pub fn predict(&self, features: &[f64], _use_confidence: bool) -> PredictedClass {
        self.predict_proba(features).argmax()
    }

    /// Returns the 3-class probability distribution. Falls back to
    /// `DummyModel`'s uniform distribution on any ensemble-call failure.
    pub fn predict_proba(&self, features: &[f64]) -> ClassProbabilities {
        let guard = self.active.read().unwrap();
        match guard.0.predict_proba(features) {
            Ok(proba) => proba,
            Err(e) => {
                warn!(
                    "ensemble '{}' predict_proba failed ({}), falling back to dummy",
                    guard.0.name(),
                    e
                );
                DummyModel.predict_proba(features).expect("dummy never fails")
            }
        }
    }

    /// If the observed feature count differs from the active level's
    /// count, reload the matching level.
    pub fn ensure_correct_model(&self, observed_feature_count: usize) {
        let needs_reload = {
            let guard = self.active.read().unwrap();
            guard.0.expected_feature_count() != observed_feature_count
        };
        if needs_reload {
            warn!(
                "observed feature count {} does not match active model, reloading",
                observed_feature_count
            );
            self.reload_model();
        }
    }

    /// Transactional reload: if the new load fails to produce anything
    /// better than `DummyModel` while the previous model was a real tier,
    /// keep the old model loaded.
    pub fn reload_model(&self) {
        let (new_predictor, new_level) = self.loader.load(&self.catalog);
        let mut guard = self.active.write().unwrap();
        if new_level == ModelLevel::Dummy && guard.1 != ModelLevel::Dummy {
            error!("reload produced only DummyModel, keeping previously loaded model");
            return;
        }
        *guard = (new_predictor, new_level);
    }
}
