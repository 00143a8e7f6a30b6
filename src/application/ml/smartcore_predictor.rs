use crate::domain::ml::{ClassProbabilities, PredictedClass, Predictor, PredictorError};
use smartcore::ensemble::random_forest_regressor::RandomForestRegressor;
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// The "basic" and "rebuilt" ensemble levels: a single random forest
/// regressor predicting a continuous score in `[0, 2]`, discretized to the
/// three class buckets. Serialized as JSON by the training pipeline, like
/// the rest of this codebase's smartcore artifacts.
pub struct SmartCorePredictor {
    model: Mutex<Option<RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>>>,
    model_path: PathBuf,
    expected_feature_count: usize,
    name: String,
}

impl SmartCorePredictor {
    pub fn load(model_path: PathBuf, expected_feature_count: usize, name: impl Into<String>) -> Self {
        let predictor = Self {
            model: Mutex::new(None),
            model_path,
            expected_feature_count,
            name: name.into(),
        };
        predictor.load_model();
        predictor
    }

    fn load_model(&self) {
        if !self.model_path.exists() {
            warn!(
                "smartcore model file not found at {:?}; predictor will error on use",
                self.model_path
            );
            return;
        }

        match File::open(&self.model_path) {
            Ok(mut file) => {
                let mut buffer = Vec::new();
                if let Err(e) = file.read_to_end(&mut buffer) {
                    error!("failed to read smartcore model file: {}", e);
                    return;
                }
                match serde_json::from_reader(std::io::Cursor::new(&buffer)) {
                    Ok(model) => {
                        info!("loaded smartcore model from {:?}", self.model_path);
                        *self.model.lock().unwrap() = Some(model);
                    }
                    Err(e) => error!("failed to deserialize smartcore model: {}", e),
                }
            }
            Err(e) => error!("failed to open smartcore model file: {}", e),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().unwrap().is_some()
    }

    /// Maps a continuous regression score to the three discrete classes.
    /// Scores below 0.8 are sell, above 1.2 are buy, the band between is
    /// hold; matches the ensemble's own argmax boundary roughly at 1.0.
    fn score_to_probabilities(score: f64) -> ClassProbabilities {
        let clamped = score.clamp(0.0, 2.0);
        if clamped < 0.8 {
            let buy_hold_mix = clamped / 0.8;
            ClassProbabilities {
                sell: 1.0 - 0.5 * buy_hold_mix,
                hold: 0.5 * buy_hold_mix,
                buy: 0.0,
            }
        } else if clamped > 1.2 {
            let mix = (clamped - 1.2) / 0.8;
            ClassProbabilities {
                sell: 0.0,
                hold: 1.0 - mix,
                buy: mix,
            }
        } else {
            ClassProbabilities {
                sell: 0.0,
                hold: 1.0,
                buy: 0.0,
            }
        }
    }
}

impl Predictor for SmartCorePredictor {
    fn predict(&self, features: &[f64]) -> Result<PredictedClass, PredictorError> {
        Ok(self.predict_proba(features)?.argmax())
    }

    fn predict_proba(&self, features: &[f64]) -> Result<ClassProbabilities, PredictorError> {
        if features.len() != self.expected_feature_count {
            return Err(PredictorError::FeatureCountMismatch {
                expected: self.expected_feature_count,
                actual: features.len(),
            });
        }

        let guard = self.model.lock().unwrap();
        let model = guard
            .as_ref()
            .ok_or_else(|| PredictorError::ArtifactUnavailable(self.model_path.display().to_string()))?;

        let matrix = DenseMatrix::from_2d_vec(&vec![features.to_vec()])
            .map_err(|e| PredictorError::InferenceFailed(format!("feature matrix build failed: {e}")))?;

        let predictions = model
            .predict(&matrix)
            .map_err(|e| PredictorError::InferenceFailed(format!("random forest predict failed: {e}")))?;

        let score = *predictions
            .first()
            .ok_or_else(|| PredictorError::InferenceFailed("empty prediction output".to_string()))?;

        Ok(Self::score_to_probabilities(score))
    }

    fn expected_feature_count(&self) -> usize {
        self.expected_feature_count
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_near_one_is_hold() {
        let proba = SmartCorePredictor::score_to_probabilities(1.0);
        assert_eq!(proba.argmax(), PredictedClass::Hold);
    }

    #[test]
    fn score_near_zero_is_sell() {
        let proba = SmartCorePredictor::score_to_probabilities(0.0);
        assert_eq!(proba.argmax(), PredictedClass::Sell);
    }

    #[test]
    fn score_near_two_is_buy() {
        let proba = SmartCorePredictor::score_to_probabilities(2.0);
        assert_eq!(proba.argmax(), PredictedClass::Buy);
    }

    #[test]
    fn missing_model_file_errors_rather_than_panics() {
        let predictor = SmartCorePredictor::load(PathBuf::from("nonexistent.json"), 3, "basic");
        assert!(!predictor.is_loaded());
        let err = predictor.predict(&[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, PredictorError::ArtifactUnavailable(_)));
    }
}
