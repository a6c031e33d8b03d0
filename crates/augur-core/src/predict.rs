//! Predictor boundary and the built-in linear model.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{JobRequest, JobResult, ModelError, PredictionError};

/// Maps a feature vector to a prediction value.
///
/// Requirements on implementations:
/// - Deterministic for a fixed model: identical input, identical output.
/// - No mutation across calls, so concurrent handlers can share one instance
///   behind an `Arc` without locking.
/// - Failures are reported as [`PredictionError`], never coerced into a
///   default prediction.
pub trait Predictor: Send + Sync {
    fn predict(&self, request: &JobRequest) -> Result<JobResult, PredictionError>;
}

/// Multi-class linear scorer: one weight row and bias per label, highest
/// score wins.
///
/// Loaded once at process start and immutable thereafter; the worker injects
/// it into the consumer loop as `Arc<dyn Predictor>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawLinearModel")]
pub struct LinearModel {
    labels: Vec<String>,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

/// Unvalidated wire shape; [`LinearModel::new`] enforces the invariants.
#[derive(Deserialize)]
struct RawLinearModel {
    labels: Vec<String>,
    weights: Vec<Vec<f64>>,
    #[serde(default)]
    bias: Vec<f64>,
}

impl TryFrom<RawLinearModel> for LinearModel {
    type Error = ModelError;

    fn try_from(raw: RawLinearModel) -> Result<Self, ModelError> {
        let bias = if raw.bias.is_empty() {
            vec![0.0; raw.labels.len()]
        } else {
            raw.bias
        };
        LinearModel::new(raw.labels, raw.weights, bias)
    }
}

impl LinearModel {
    pub fn new(
        labels: Vec<String>,
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
    ) -> Result<Self, ModelError> {
        if labels.is_empty() {
            return Err(ModelError::Invalid("model has no labels".to_string()));
        }
        if weights.len() != labels.len() || bias.len() != labels.len() {
            return Err(ModelError::Invalid(format!(
                "expected {} weight rows and bias terms, got {} and {}",
                labels.len(),
                weights.len(),
                bias.len()
            )));
        }

        let dimension = weights[0].len();
        if dimension == 0 {
            return Err(ModelError::Invalid("weight rows are empty".to_string()));
        }
        if weights.iter().any(|row| row.len() != dimension) {
            return Err(ModelError::Invalid(
                "weight rows have inconsistent lengths".to_string(),
            ));
        }
        if weights
            .iter()
            .flatten()
            .chain(bias.iter())
            .any(|v| !v.is_finite())
        {
            return Err(ModelError::Invalid(
                "model parameters must be finite".to_string(),
            ));
        }

        Ok(Self {
            labels,
            weights,
            bias,
        })
    }

    /// Load and validate a model from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ModelError> {
        let raw = fs::read(path)?;
        let model: LinearModel = serde_json::from_slice(&raw)?;
        Ok(model)
    }

    /// Feature dimensionality this model accepts.
    pub fn dimension(&self) -> usize {
        self.weights[0].len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl Predictor for LinearModel {
    fn predict(&self, request: &JobRequest) -> Result<JobResult, PredictionError> {
        if request.dimension() != self.dimension() {
            return Err(PredictionError::ShapeMismatch {
                expected: self.dimension(),
                got: request.dimension(),
            });
        }

        let mut best: Option<(usize, f64)> = None;
        for (index, (row, bias)) in self.weights.iter().zip(&self.bias).enumerate() {
            let score = row
                .iter()
                .zip(&request.input_data)
                .map(|(w, x)| w * x)
                .sum::<f64>()
                + bias;
            if !score.is_finite() {
                return Err(PredictionError::NonFiniteOutput);
            }
            // Strict comparison keeps the first label on ties, so the output
            // is stable across runs.
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((index, score)),
            }
        }

        let (index, _) = best.expect("validated model has at least one label");
        Ok(JobResult::label(self.labels[index].clone()))
    }
}
