//! Domain model (jobs, deliveries, dispositions, errors).

pub mod decision;
pub mod delivery;
pub mod errors;
pub mod job;

pub use decision::{Disposition, FailurePolicy, HandleOutcome, decide};
pub use delivery::{Delivery, DeliveryTag, MessageId};
pub use errors::{BrokerError, DecodeError, ModelError, PredictionError};
pub use job::{JobRequest, JobResult, Prediction};
