//! augur-core
//!
//! Building blocks for the augur inference worker:
//! - **domain**: jobs, deliveries, dispositions, errors
//! - **decode**: raw message body -> validated job request
//! - **predict**: the `Predictor` boundary and the built-in linear model
//! - **broker**: consumer-facing port and the in-memory work-queue broker
//! - **consumer**: the delivery-handling loop and worker group
//! - **lifecycle**: startup connection and signal-triggered shutdown
//! - **config**: consumer configuration
//!
//! The consumer loop only sees the [`broker::Subscription`] and
//! [`predict::Predictor`] traits; those two seams are where production
//! deployments swap in a networked broker and a real model.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod decode;
pub mod domain;
pub mod lifecycle;
pub mod predict;
