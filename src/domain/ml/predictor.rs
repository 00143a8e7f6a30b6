/// Predicted trade direction, as the ensemble's integer class label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictedClass {
    Sell,
    Hold,
    Buy,
}

impl PredictedClass {
    pub fn from_label(label: i32) -> Option<Self> {
        match label {
            0 => Some(PredictedClass::Sell),
            1 => Some(PredictedClass::Hold),
            2 => Some(PredictedClass::Buy),
            _ => None,
        }
    }

    pub fn as_label(&self) -> i32 {
        match self {
            PredictedClass::Sell => 0,
            PredictedClass::Hold => 1,
            PredictedClass::Buy => 2,
        }
    }
}

/// Per-sample probabilities for the three classes, in `[sell, hold, buy]`
/// order. Always sums to ~1.0; shape is validated by whoever produces it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassProbabilities {
    pub sell: f64,
    pub hold: f64,
    pub buy: f64,
}

impl ClassProbabilities {
    pub fn uniform() -> Self {
        Self {
            sell: 1.0 / 3.0,
            hold: 1.0 / 3.0,
            buy: 1.0 / 3.0,
        }
    }

    pub fn argmax(&self) -> PredictedClass {
        if self.buy >= self.sell && self.buy >= self.hold {
            PredictedClass::Buy
        } else if self.sell >= self.hold {
            PredictedClass::Sell
        } else {
            PredictedClass::Hold
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("feature vector length {actual} does not match expected {expected} for loaded model")]
    FeatureCountMismatch { expected: usize, actual: usize },
    #[error("model inference failed: {0}")]
    InferenceFailed(String),
    #[error("model artifact missing or unloadable at {0}")]
    ArtifactUnavailable(String),
}

/// Common surface every loaded ensemble level and `DummyModel` implement.
/// `MLAdapter` holds a `Box<dyn Predictor>` and falls back to `DummyModel`
/// whenever a call returns `Err`.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<PredictedClass, PredictorError>;

    fn predict_proba(&self, features: &[f64]) -> Result<ClassProbabilities, PredictorError>;

    fn expected_feature_count(&self) -> usize;

    fn name(&self) -> &str;
}

/// Level 5 fallback: always predicts hold with uniform probability. Never
/// fails, so `MLAdapter` can always recover to it.
pub struct DummyModel;

impl Predictor for DummyModel {
    fn predict(&self, _features: &[f64]) -> Result<PredictedClass, PredictorError> {
        Ok(PredictedClass::Hold)
    }

    fn predict_proba(&self, _features: &[f64]) -> Result<ClassProbabilities, PredictorError> {
        Ok(ClassProbabilities::uniform())
    }

    fn expected_feature_count(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "dummy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_model_always_predicts_hold() {
        let model = DummyModel;
        assert_eq!(model.predict(&[1.0, 2.0]).unwrap(), PredictedClass::Hold);
        let proba = model.predict_proba(&[]).unwrap();
        assert_eq!(proba.argmax(), PredictedClass::Hold);
    }

    #[test]
    fn argmax_prefers_buy_on_tie_with_sell() {
        let proba = ClassProbabilities {
            sell: 0.4,
            hold: 0.2,
            buy: 0.4,
        };
        assert_eq!(proba.argmax(), PredictedClass::Buy);
    }
}
