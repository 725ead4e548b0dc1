use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::models::{
    channel::ChannelKind,
    status::DeliveryStatus,
    template::{Priority, TemplateKey},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMetadata {
    #[serde(default)]
    pub retry_attempt: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Set for failures that a resend cannot fix (bad address, caller error).
    #[serde(default)]
    pub permanent_failure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,

    #[serde(default)]
    pub confirmation_checks: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl LogMetadata {
    pub fn with_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The part a caller may set: batch id and free-form keys. Attempt counters,
    /// timestamps and provider state always start from their defaults.
    pub fn caller_supplied(&self) -> Self {
        Self {
            batch_id: self.batch_id,
            extra: self.extra.clone(),
            ..Default::default()
        }
    }

    /// Metadata carried into the next attempt of the same notification.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_attempt: self.retry_attempt + 1,
            ..self.caller_supplied()
        }
    }
}

/// Durable record of one delivery attempt to one recipient over one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub channel: ChannelKind,
    pub template_key: Option<TemplateKey>,
    pub subject: Option<String>,
    pub body: String,
    pub priority: Priority,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub metadata: LogMetadata,
}

impl LogEntry {
    pub fn pending(
        recipient_id: Uuid,
        channel: ChannelKind,
        template_key: Option<TemplateKey>,
        subject: Option<String>,
        body: String,
        priority: Priority,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id,
            channel,
            template_key,
            subject,
            body,
            priority,
            status: DeliveryStatus::Pending,
            created_at,
            sent_at: None,
            delivered_at: None,
            metadata: LogMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: LogMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_retry_eligible(&self) -> bool {
        self.status == DeliveryStatus::Failed
            && self.metadata.retried_at.is_none()
            && !self.metadata.permanent_failure
    }

    pub fn delivery_seconds(&self) -> Option<f64> {
        match (self.sent_at, self.delivered_at) {
            (Some(sent), Some(delivered)) => {
                Some((delivered - sent).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }
}
