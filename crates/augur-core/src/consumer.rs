//! Consumer loop: bridges broker deliveries to the predictor.
//!
//! Flow per delivery: decode the body, invoke the predictor, settle via the
//! lease. Concurrency across the group is bounded by the channel's prefetch,
//! enforced at the broker-subscription boundary; the workers themselves add
//! no flow control of their own.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{DeliveryLease, Subscription};
use crate::decode::decode;
use crate::domain::{
    BrokerError, Disposition, FailurePolicy, HandleOutcome, PredictionError, decide,
};
use crate::predict::Predictor;

/// Handle to a group of consumer workers sharing one subscription.
///
/// - `request_shutdown()` stops taking new deliveries; in-flight ones run to
///   a terminal disposition before the workers exit.
/// - `shutdown_and_join()` does both and waits for the drain.
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers over one subscription.
    pub fn spawn(
        n: usize,
        subscription: Arc<dyn Subscription>,
        predictor: Arc<dyn Predictor>,
        policy: FailurePolicy,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let subscription = Arc::clone(&subscription);
            let predictor = Arc::clone(&predictor);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                consumer_loop(worker_id, subscription, predictor, policy, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    /// Stop accepting new deliveries. Does not cancel in-flight handling.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for all workers to exit.
    pub async fn join(self) {
        for join in self.joins {
            let _ = join.await;
        }
    }

    /// Request shutdown and wait for the drain.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }
}

async fn consumer_loop(
    worker_id: usize,
    subscription: Arc<dyn Subscription>,
    predictor: Arc<dyn Predictor>,
    policy: FailurePolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Waiting for a delivery can block indefinitely, so race it against
        // the shutdown signal.
        let lease = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            lease = subscription.next_delivery() => lease,
        };

        let Some(lease) = lease else {
            debug!(worker_id, "subscription closed, worker exiting");
            break;
        };

        if let Err(e) = handle_delivery(lease, predictor.as_ref(), policy).await {
            // The delivery could not be settled; the broker will redeliver it
            // once the session drops.
            error!(worker_id, error = %e, "failed to settle delivery");
        }
    }
}

/// Run one delivery to its terminal disposition.
pub async fn handle_delivery(
    lease: Box<dyn DeliveryLease>,
    predictor: &dyn Predictor,
    policy: FailurePolicy,
) -> Result<(), BrokerError> {
    let tag = lease.delivery().tag;
    let message_id = lease.delivery().message_id;
    let redeliveries = lease.delivery().redeliveries;
    debug!(
        %message_id,
        %tag,
        redelivered = lease.delivery().redelivered,
        "delivery received"
    );

    let outcome = match decode(&lease.delivery().body) {
        Err(e) => HandleOutcome::DecodeFailed(e),
        Ok(request) => {
            debug!(%message_id, %tag, features = request.dimension(), "decoded");
            // A panicking model must not leave the delivery without a
            // disposition.
            match catch_unwind(AssertUnwindSafe(|| predictor.predict(&request))) {
                Ok(Ok(result)) => HandleOutcome::Predicted(result),
                Ok(Err(e)) => HandleOutcome::PredictFailed(e),
                Err(_) => HandleOutcome::PredictFailed(PredictionError::Internal(
                    "predictor panicked".to_string(),
                )),
            }
        }
    };

    match decide(&outcome, policy, redeliveries) {
        Disposition::Ack => {
            if let HandleOutcome::Predicted(result) = &outcome {
                info!(%message_id, %tag, prediction = ?result.prediction, "predicted");
            }
            lease.ack().await?;
            debug!(%message_id, %tag, "acked");
        }
        Disposition::Reject { requeue } => {
            match &outcome {
                HandleOutcome::DecodeFailed(e) => {
                    warn!(%message_id, %tag, error = %e, "rejecting malformed message");
                }
                HandleOutcome::PredictFailed(e) => {
                    warn!(
                        %message_id,
                        %tag,
                        error = %e,
                        requeue,
                        redeliveries,
                        "prediction failed"
                    );
                }
                HandleOutcome::Predicted(_) => {}
            }
            lease.reject(requeue).await?;
        }
    }

    Ok(())
}
