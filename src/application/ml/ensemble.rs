use crate::domain::ml::{ClassProbabilities, PredictedClass, Predictor, PredictorError};

/// One base learner plus its weight in the ensemble vote. Weights across a
/// given `EnsemblePredictor` must sum to 1.0; `EnsemblePredictor::new`
/// normalizes rather than rejecting a caller's slightly-off weights.
pub struct WeightedMember {
    pub predictor: Box<dyn Predictor>,
    pub weight: f64,
}

/// The "full" ensemble level: a weighted average of each base learner's
/// probability output, weighted argmax as the predicted class.
pub struct EnsemblePredictor {
    members: Vec<WeightedMember>,
    expected_feature_count: usize,
    name: String,
}

impl EnsemblePredictor {
    pub fn new(
        name: impl Into<String>,
        mut members: Vec<WeightedMember>,
        expected_feature_count: usize,
    ) -> Self {
        let total_weight: f64 = members.iter().map(|m| m.weight).sum();
        if total_weight > 0.0 {
            for member in &mut members {
                member.weight /= total_weight;
            }
        }
        Self {
            members,
            expected_feature_count,
            name: name.into(),
        }
    }
}

impl Predictor for EnsemblePredictor {
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
        if self.members.is_empty() {
            return Err(PredictorError::InferenceFailed(
                "ensemble has no members".to_string(),
            ));
        }

        let mut sell = 0.0;
        let mut hold = 0.0;
        let mut buy = 0.0;
        for member in &self.members {
            let proba = member.predictor.predict_proba(features)?;
            sell += proba.sell * member.weight;
            hold += proba.hold * member.weight;
            buy += proba.buy * member.weight;
        }

        let total = sell + hold + buy;
        if (total - 1.0).abs() > 0.05 {
            return Err(PredictorError::InferenceFailed(format!(
                "ensemble probabilities do not sum to 1.0 (got {total:.4})"
            )));
        }

        Ok(ClassProbabilities { sell, hold, buy })
    }

    fn expected_feature_count(&self) -> usize {
        self.expected_feature_count
    }

    fn name(&self) -> &str {
        &self.name
    }
}
