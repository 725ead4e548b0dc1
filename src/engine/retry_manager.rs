use tracing::{info, warn};

use crate::{
    engine::{NotificationEngine, SweepReport},
    error::NotifyError,
    models::status::DeliveryStatus,
    store::RetryClaim,
};

impl NotificationEngine {
    /// Resends recent transient failures, once each.
    ///
    /// Entries are claimed and stamped in one store operation, so overlapping sweeps
    /// never resend the same failure twice.
    pub async fn retry_recent(&self) -> Result<SweepReport, NotifyError> {
        let now = self.clock.now();
        let claimed = self
            .logs
            .claim_failed_for_retry(RetryClaim {
                now,
                created_after: now - self.settings.retry_lookback,
                max_attempt: self.settings.retry_max_attempts,
                limit: self.settings.retry_batch_size,
            })
            .await?;

        let mut report = SweepReport {
            examined: claimed.len(),
            ..Default::default()
        };

        for original in &claimed {
            match self.redeliver(original).await {
                Ok(entry) if entry.status == DeliveryStatus::Sent => report.succeeded += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    warn!(log_id = %original.id, error = %e, "Retry could not be dispatched");
                    report.errors += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                claimed = report.examined,
                resent = report.succeeded,
                failed_again = report.failed,
                errors = report.errors,
                "Retry sweep finished"
            );
        }

        Ok(report)
    }
}
