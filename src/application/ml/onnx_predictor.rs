use crate::domain::ml::{ClassProbabilities, PredictedClass, Predictor, PredictorError};
use ndarray::Array2;
use ort::session::Session;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// A single ensemble level backed by an ONNX Runtime session. Feature-count
/// validation and the dummy fallback both happen one layer up, in
/// `MLAdapter`; this type just fails loudly when the session is unusable.
pub struct OnnxPredictor {
    session: Option<Mutex<Session>>,
    model_path: PathBuf,
    expected_feature_count: usize,
    name: String,
}

impl OnnxPredictor {
    pub fn load(model_path: PathBuf, expected_feature_count: usize, name: impl Into<String>) -> Self {
        let mut predictor = Self {
            session: None,
            model_path,
            expected_feature_count,
            name: name.into(),
        };
        predictor.load_session();
        predictor
    }

    fn load_session(&mut self) {
        if !self.model_path.exists() {
            warn!(
                "ONNX model file not found at {:?}; predictor will error on use",
                self.model_path
            );
            return;
        }

        match Session::builder() {
            Ok(builder) => match builder.commit_from_file(&self.model_path) {
                Ok(session) => {
                    info!("loaded ONNX model from {:?}", self.model_path);
                    self.session = Some(Mutex::new(session));
                }
                Err(e) => error!("failed to load ONNX model: {}", e),
            },
            Err(e) => error!("failed to create ONNX session builder: {}", e),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }
}

impl Predictor for OnnxPredictor {
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

        let session_mutex = self
            .session
            .as_ref()
            .ok_or_else(|| PredictorError::ArtifactUnavailable(self.model_path.display().to_string()))?;

        let mut session = session_mutex
            .lock()
            .map_err(|e| PredictorError::InferenceFailed(format!("session mutex poisoned: {e}")))?;

        let input: Vec<f32> = features.iter().map(|&v| v as f32).collect();
        let array = Array2::from_shape_vec((1, input.len()), input)
            .map_err(|e| PredictorError::InferenceFailed(format!("input array shape invalid: {e}")))?;
        let input_value = ort::value::Value::from_array(array)
            .map_err(|e| PredictorError::InferenceFailed(format!("input tensor build failed: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| PredictorError::InferenceFailed(format!("session run failed: {e}")))?;

        let output_value = outputs
            .iter()
            .next()
            .map(|(_, v)| v)
            .ok_or_else(|| PredictorError::InferenceFailed("model produced no output".to_string()))?;

        let tensor = output_value
            .try_extract_tensor::<f32>()
            .map_err(|e| PredictorError::InferenceFailed(format!("output extraction failed: {e}")))?;

        let probs: Vec<f64> = tensor.1.iter().map(|&v| v as f64).collect();
        if probs.len() != 3 {
            return Err(PredictorError::InferenceFailed(format!(
                "expected 3-class output, got {} values",
                probs.len()
            )));
        }

        Ok(ClassProbabilities {
            sell: probs[0],
            hold: probs[1],
            buy: probs[2],
        })
    }

    fn expected_feature_count(&self) -> usize {
        self.expected_feature_count
    }

    fn name(&self) -> &str {
        &self.name
    }
}
