use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::batch::BatchOutcome;

pub const BATCH_SENT_ACTION: &str = "NOTIFICATION_BATCH_SENT";

/// One record per completed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub action: String,
    pub batch_id: Uuid,
    pub template_key: String,
    pub recipients_count: u32,
    pub sent_count: u32,
    pub failed_count: u32,
    pub initiating_user: Uuid,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn batch_sent(
        batch_id: Uuid,
        template_key: String,
        initiating_user: Uuid,
        outcome: &BatchOutcome,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action: BATCH_SENT_ACTION.to_string(),
            batch_id,
            template_key,
            recipients_count: outcome.total_recipients,
            sent_count: outcome.sent_count,
            failed_count: outcome.failed_count,
            initiating_user,
            recorded_at,
        }
    }
}
