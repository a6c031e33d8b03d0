//! Job request/result model.

use serde::{Deserialize, Serialize};

/// One inference job as carried on the wire.
///
/// The body is JSON: `{"input_data": [1.0, 2.0, 3.0]}`. Validation beyond
/// structure (non-empty) lives in [`crate::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub input_data: Vec<f64>,
}

impl JobRequest {
    pub fn new(input_data: Vec<f64>) -> Self {
        Self { input_data }
    }

    /// Number of features in this request.
    pub fn dimension(&self) -> usize {
        self.input_data.len()
    }
}

/// A prediction value: categorical label or raw numeric output.
///
/// Untagged so a label serializes as a bare string and a numeric output as a
/// bare number, matching the producer side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prediction {
    Label(String),
    Value(f64),
}

/// The outcome of one successfully handled job.
///
/// Serialized as `{"prediction": ...}`. Correlation with the originating
/// delivery happens at the consumer via the delivery tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub prediction: Prediction,
}

impl JobResult {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            prediction: Prediction::Label(label.into()),
        }
    }

    pub fn value(value: f64) -> Self {
        Self {
            prediction: Prediction::Value(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_wire_format() {
        let request: JobRequest =
            serde_json::from_str(r#"{"input_data": [1.0, 2.0, 3.0]}"#).unwrap();
        assert_eq!(request.input_data, vec![1.0, 2.0, 3.0]);
        assert_eq!(request.dimension(), 3);
    }

    #[test]
    fn result_serializes_label_as_bare_string() {
        let result = JobResult::label("A");
        let s = serde_json::to_string(&result).unwrap();
        assert_eq!(s, r#"{"prediction":"A"}"#);
    }

    #[test]
    fn result_serializes_value_as_bare_number() {
        let result = JobResult::value(0.5);
        let s = serde_json::to_string(&result).unwrap();
        assert_eq!(s, r#"{"prediction":0.5}"#);
    }
}
