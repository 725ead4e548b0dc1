//! Persistence ports used by the engine.
//!
//! Every write is either an append or a single-row conditional transition, so
//! implementations never need locks spanning more than one row.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{
    audit::AuditRecord,
    batch::{Audience, BatchJob, BatchOutcome},
    channel::ChannelKind,
    log::LogEntry,
    recipient::Recipient,
    statistics::{ChannelStatusCount, StatisticsWindow, TemplateCount},
    status::DeliveryStatus,
};

pub use memory::InMemoryStore;

/// Selection rule for one retry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryClaim {
    pub now: DateTime<Utc>,
    pub created_after: DateTime<Utc>,
    pub max_attempt: u32,
    pub limit: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert(&self, entry: &LogEntry) -> anyhow::Result<()>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<LogEntry>>;

    /// `PENDING -> SENT`. Returns false when the entry was not pending.
    async fn mark_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        provider_message_id: Option<String>,
    ) -> anyhow::Result<bool>;

    /// `PENDING -> FAILED`. Returns false when the entry was not pending.
    async fn mark_failed(&self, id: Uuid, error: String, permanent: bool) -> anyhow::Result<bool>;

    async fn find_stale_sent(
        &self,
        sent_before: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<LogEntry>>;

    /// `SENT -> DELIVERED`. Returns false when the entry was not in SENT any more.
    async fn mark_delivered(&self, id: Uuid, delivered_at: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Counts one failed confirmation; at `max_checks` the entry becomes UNCONFIRMED.
    /// Returns the status after the update, `None` if the entry was not in SENT.
    async fn record_unconfirmed_check(
        &self,
        id: Uuid,
        max_checks: u32,
    ) -> anyhow::Result<Option<DeliveryStatus>>;

    /// Selects retry-eligible failures and stamps `retried_at` in the same atomic step.
    async fn claim_failed_for_retry(&self, claim: RetryClaim) -> anyhow::Result<Vec<LogEntry>>;

    async fn count_by_channel_and_status(
        &self,
        window: StatisticsWindow,
    ) -> anyhow::Result<Vec<ChannelStatusCount>>;

    async fn count_by_template(&self, window: StatisticsWindow) -> anyhow::Result<Vec<TemplateCount>>;

    async fn average_delivery_seconds(
        &self,
        window: StatisticsWindow,
    ) -> anyhow::Result<BTreeMap<ChannelKind, f64>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn create(&self, batch: &BatchJob) -> anyhow::Result<()>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<BatchJob>>;

    /// Marks a PENDING batch as started and returns it. `None` when the batch does not
    /// exist, is no longer pending or was already started by another runner.
    async fn claim(&self, id: Uuid, started_at: DateTime<Utc>) -> anyhow::Result<Option<BatchJob>>;

    async fn complete(&self, id: Uuid, outcome: BatchOutcome) -> anyhow::Result<()>;

    async fn mark_failed(&self, id: Uuid) -> anyhow::Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn find_active(&self, id: Uuid) -> anyhow::Result<Option<Recipient>>;

    /// Recipients in a stable order.
    async fn resolve_audience(&self, audience: &Audience) -> anyhow::Result<Vec<Recipient>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()>;
}
