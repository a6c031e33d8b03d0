//! Process lifecycle: startup connection and signal-triggered shutdown.

use tracing::{info, warn};

use crate::broker::{Channel, InMemoryBroker};
use crate::config::ConnectConfig;
use crate::domain::BrokerError;

/// Establish a channel, retrying with bounded exponential backoff.
///
/// With the default single-attempt config this fails fast: an unreachable
/// broker at startup is fatal and the process exits non-zero.
pub async fn connect_with_backoff(
    broker: &InMemoryBroker,
    config: &ConnectConfig,
) -> Result<Channel, BrokerError> {
    let mut attempt = 1u32;
    loop {
        match broker.connect().await {
            Ok(channel) => {
                info!(attempt, "broker connection established");
                return Ok(channel);
            }
            Err(e) if attempt >= config.max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for(attempt);
                warn!(
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "broker connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Wait for an operator-initiated shutdown signal (ctrl-c).
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
