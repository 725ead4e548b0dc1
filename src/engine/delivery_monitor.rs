use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    engine::{NotificationEngine, SweepReport},
    error::{NotifyError, ProviderError},
    models::{log::LogEntry, status::DeliveryStatus},
};

impl NotificationEngine {
    /// Asks providers about SENT entries older than the staleness threshold.
    ///
    /// Confirmed entries become DELIVERED. Anything else counts one confirmation check,
    /// and an entry that runs out of checks is parked as UNCONFIRMED.
    pub async fn sweep_delivery_status(&self) -> Result<SweepReport, NotifyError> {
        let now = self.clock.now();
        let stale = self
            .logs
            .find_stale_sent(
                now - self.settings.delivery_stale_after,
                self.settings.delivery_sweep_batch_size,
            )
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..Default::default()
        };

        for entry in &stale {
            let confirmed = match self.check_delivered(entry).await {
                Ok(confirmed) => confirmed,
                Err(e) => {
                    debug!(log_id = %entry.id, error = %e, "Delivery check failed");
                    report.errors += 1;
                    false
                }
            };

            if let Err(e) = self.settle(entry, confirmed, &mut report).await {
                warn!(log_id = %entry.id, error = %e, "Failed to update delivery status");
                report.errors += 1;
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                delivered = report.succeeded,
                unconfirmed = report.failed,
                errors = report.errors,
                "Delivery sweep finished"
            );
        }

        Ok(report)
    }

    async fn check_delivered(&self, entry: &LogEntry) -> Result<bool, ProviderError> {
        let Some(provider_message_id) = entry.metadata.provider_message_id.as_deref() else {
            return Ok(false);
        };

        let sender = self.adapters.get(entry.channel).ok_or_else(|| {
            ProviderError::Permanent(format!("no adapter registered for {}", entry.channel))
        })?;

        match timeout(
            self.settings.send_timeout,
            sender.check_delivered(provider_message_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Transient("delivery check timed out".to_string())),
        }
    }

    async fn settle(
        &self,
        entry: &LogEntry,
        confirmed: bool,
        report: &mut SweepReport,
    ) -> anyhow::Result<()> {
        if confirmed {
            if self.logs.mark_delivered(entry.id, self.clock.now()).await? {
                report.succeeded += 1;
            }
            return Ok(());
        }

        let status = self
            .logs
            .record_unconfirmed_check(entry.id, self.settings.delivery_max_checks)
            .await?;

        if status == Some(DeliveryStatus::Unconfirmed) {
            warn!(
                log_id = %entry.id,
                channel = %entry.channel,
                max_checks = self.settings.delivery_max_checks,
                "Delivery never confirmed, giving up"
            );
            report.failed += 1;
        }

        Ok(())
    }
}
