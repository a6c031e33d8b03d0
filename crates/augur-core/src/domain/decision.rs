//! Disposition decision: what to tell the broker once handling finished.
//!
//! Design intent:
//! - The handler reports what happened ([`HandleOutcome`]).
//! - A pure function maps that, plus the failure policy and the message's
//!   redelivery count, to a terminal [`Disposition`].
//! Keeping the decision pure makes the retry policy testable without a
//! broker or a model in the picture.

use serde::{Deserialize, Serialize};

use super::errors::{DecodeError, PredictionError};
use super::job::JobResult;

/// What happened while handling one delivery.
#[derive(Debug)]
pub enum HandleOutcome {
    Predicted(JobResult),
    DecodeFailed(DecodeError),
    PredictFailed(PredictionError),
}

/// Terminal disposition for a delivery.
///
/// Per-delivery transitions:
/// - Received -> Decoded -> Predicted -> `Ack`
/// - Received -> decode failure -> `Reject { requeue: false }`
/// - Received -> Decoded -> prediction failure -> `Reject` (requeue per policy)
///
/// Every delivery reaches exactly one of these; the consumer loop guarantees
/// it even when the predictor panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject { requeue: bool },
}

/// Policy for deliveries whose prediction failed.
///
/// Requeueing always carries a cap: an unbounded requeue-on-failure policy
/// would loop a permanently failing message forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Reject without requeue: treat the message as poison.
    DeadLetter,

    /// Requeue until the message has been redelivered `max_redeliveries`
    /// times, then reject without requeue.
    Requeue { max_redeliveries: u32 },
}

impl FailurePolicy {
    pub fn should_requeue(&self, redeliveries: u32) -> bool {
        match *self {
            FailurePolicy::DeadLetter => false,
            FailurePolicy::Requeue { max_redeliveries } => redeliveries < max_redeliveries,
        }
    }
}

/// Map a handling outcome to its terminal disposition.
///
/// Decode failures never requeue regardless of policy: a body that did not
/// decode will not decode on redelivery either.
pub fn decide(outcome: &HandleOutcome, policy: FailurePolicy, redeliveries: u32) -> Disposition {
    match outcome {
        HandleOutcome::Predicted(_) => Disposition::Ack,
        HandleOutcome::DecodeFailed(_) => Disposition::Reject { requeue: false },
        HandleOutcome::PredictFailed(_) => Disposition::Reject {
            requeue: policy.should_requeue(redeliveries),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn predicted() -> HandleOutcome {
        HandleOutcome::Predicted(JobResult::label("A"))
    }

    fn decode_failed() -> HandleOutcome {
        HandleOutcome::DecodeFailed(DecodeError::EmptyInput)
    }

    fn predict_failed() -> HandleOutcome {
        HandleOutcome::PredictFailed(PredictionError::NonFiniteOutput)
    }

    #[test]
    fn success_is_acked() {
        let d = decide(&predicted(), FailurePolicy::DeadLetter, 0);
        assert_eq!(d, Disposition::Ack);
    }

    #[rstest]
    #[case::dead_letter(FailurePolicy::DeadLetter)]
    #[case::requeue(FailurePolicy::Requeue { max_redeliveries: 3 })]
    fn decode_failure_never_requeues(#[case] policy: FailurePolicy) {
        let d = decide(&decode_failed(), policy, 0);
        assert_eq!(d, Disposition::Reject { requeue: false });
    }

    #[test]
    fn prediction_failure_dead_letters_by_default() {
        let d = decide(&predict_failed(), FailurePolicy::DeadLetter, 0);
        assert_eq!(d, Disposition::Reject { requeue: false });
    }

    #[rstest]
    #[case::first_attempt(0, true)]
    #[case::below_cap(1, true)]
    #[case::at_cap(2, false)]
    #[case::past_cap(5, false)]
    fn requeue_policy_is_capped(#[case] redeliveries: u32, #[case] expect_requeue: bool) {
        let policy = FailurePolicy::Requeue { max_redeliveries: 2 };
        let d = decide(&predict_failed(), policy, redeliveries);
        assert_eq!(
            d,
            Disposition::Reject {
                requeue: expect_requeue
            }
        );
    }

    #[test]
    fn failure_policy_parses_from_config_json() {
        let p: FailurePolicy = serde_json::from_str(r#"{"mode":"dead_letter"}"#).unwrap();
        assert_eq!(p, FailurePolicy::DeadLetter);

        let p: FailurePolicy =
            serde_json::from_str(r#"{"mode":"requeue","max_redeliveries":3}"#).unwrap();
        assert_eq!(p, FailurePolicy::Requeue { max_redeliveries: 3 });
    }
}
