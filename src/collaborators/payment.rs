use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::collaborators::CollaboratorError;
use crate::observability::metrics::Metrics;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge_on_delivery(&self, package_id: Uuid) -> Result<(), CollaboratorError>;
}

pub struct LoggingPaymentGateway;

#[async_trait]
impl PaymentGateway for LoggingPaymentGateway {
    async fn charge_on_delivery(&self, package_id: Uuid) -> Result<(), CollaboratorError> {
        info!(package_id = %package_id, "delivery charge captured");
        Ok(())
    }
}

/// Captures payment for a delivered package in the background. The package
/// stays delivered whatever happens here; failures are retried with
/// exponential backoff and then logged.
pub fn spawn_delivery_charge(
    gateway: Arc<dyn PaymentGateway>,
    metrics: Metrics,
    package_id: Uuid,
    max_attempts: u32,
    base_backoff: Duration,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        let charged =
            charge_with_retry(gateway.as_ref(), package_id, max_attempts, base_backoff).await;
        let outcome = if charged { "success" } else { "failed" };
        metrics.payments_total.with_label_values(&[outcome]).inc();
        charged
    })
}

pub async fn charge_with_retry(
    gateway: &dyn PaymentGateway,
    package_id: Uuid,
    max_attempts: u32,
    base_backoff: Duration,
) -> bool {
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match gateway.charge_on_delivery(package_id).await {
            Ok(()) => return true,
            Err(err) if attempt < max_attempts => {
                warn!(package_id = %package_id, attempt, error = %err, "delivery charge failed; retrying");
                sleep(base_backoff * 2u32.saturating_pow(attempt - 1)).await;
            }
            Err(err) => {
                error!(package_id = %package_id, attempt, error = %err, "delivery charge failed; giving up");
            }
        }
    }

    false
}
