use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    engine::NotificationEngine,
    error::NotifyError,
    models::statistics::{NotificationStatistics, StatisticsWindow},
};

impl NotificationEngine {
    /// Counts and delivery latencies for entries created inside `[start, end]`.
    pub async fn get_statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<NotificationStatistics, NotifyError> {
        if end < start {
            return Err(NotifyError::InvalidWindow);
        }

        let window = StatisticsWindow { start, end };

        let (by_channel_and_status, by_template, avg_delivery_time_by_channel) = tokio::try_join!(
            self.logs.count_by_channel_and_status(window),
            self.logs.count_by_template(window),
            self.logs.average_delivery_seconds(window),
        )?;

        debug!(
            start = %start,
            end = %end,
            groups = by_channel_and_status.len(),
            "Statistics computed"
        );

        Ok(NotificationStatistics {
            period: window,
            by_channel_and_status,
            by_template,
            avg_delivery_time_by_channel,
        })
    }
}
