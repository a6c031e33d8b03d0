//! Error taxonomy for the consumer.
//!
//! Each variant class maps to a different recovery path:
//! - [`DecodeError`] is recovered locally (reject without requeue).
//! - [`PredictionError`] is settled per the configured failure policy.
//! - [`BrokerError`] at startup is fatal; mid-run it ends the session.
//! - [`ModelError`] is fatal at startup (the model loads exactly once).

use thiserror::Error;

use super::delivery::DeliveryTag;

/// Malformed message body. Retrying cannot help, so these messages are
/// rejected without requeue.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid message body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("input_data must not be empty")]
    EmptyInput,
}

/// The predictor could not produce a result. Never coerced into a default
/// prediction.
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("feature shape mismatch: model expects {expected} features, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("prediction produced a non-finite score")]
    NonFiniteOutput,

    #[error("model fault: {0}")]
    Internal(String),
}

/// Cannot establish or keep using the broker connection.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection refused")]
    ConnectionRefused,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("no such queue: {0}")]
    UnknownQueue(String),

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(DeliveryTag),
}

/// The model file could not be turned into a usable predictor.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse model file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid model: {0}")]
    Invalid(String),
}
