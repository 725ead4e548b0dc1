use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    models::{
        audit::AuditRecord,
        batch::{Audience, BatchJob, BatchOutcome},
        channel::ChannelKind,
        log::LogEntry,
        recipient::Recipient,
        statistics::{ChannelStatusCount, StatisticsWindow, TemplateCount},
        status::{BatchStatus, DeliveryStatus},
        template::TemplateKey,
    },
    store::{AuditSink, BatchStore, LogStore, RecipientDirectory, RetryClaim},
};

#[derive(Debug)]
struct StoredBatch {
    job: BatchJob,
    started_at: Option<DateTime<Utc>>,
}

/// Process-local implementation of every port, for tests and single-node runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    logs: RwLock<Vec<LogEntry>>,
    batches: RwLock<HashMap<Uuid, StoredBatch>>,
    recipients: RwLock<Vec<Recipient>>,
    audit: RwLock<Vec<AuditRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_recipient(&self, recipient: Recipient) {
        self.recipients.write().push(recipient);
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.read().clone()
    }

    pub fn logs_for(&self, recipient_id: Uuid) -> Vec<LogEntry> {
        self.logs
            .read()
            .iter()
            .filter(|entry| entry.recipient_id == recipient_id)
            .cloned()
            .collect()
    }

    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.read().clone()
    }

    fn update_log<F>(&self, id: Uuid, expected: DeliveryStatus, apply: F) -> bool
    where
        F: FnOnce(&mut LogEntry),
    {
        let mut logs = self.logs.write();
        match logs
            .iter_mut()
            .find(|entry| entry.id == id && entry.status == expected)
        {
            Some(entry) => {
                apply(entry);
                true
            }
            None => false,
        }
    }

    fn in_window(&self, window: StatisticsWindow) -> Vec<LogEntry> {
        self.logs
            .read()
            .iter()
            .filter(|entry| window.contains(entry.created_at))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LogStore for InMemoryStore {
    async fn insert(&self, entry: &LogEntry) -> anyhow::Result<()> {
        let mut logs = self.logs.write();
        if logs.iter().any(|existing| existing.id == entry.id) {
            anyhow::bail!("log entry {} already exists", entry.id);
        }
        logs.push(entry.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<LogEntry>> {
        Ok(self.logs.read().iter().find(|entry| entry.id == id).cloned())
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        provider_message_id: Option<String>,
    ) -> anyhow::Result<bool> {
        Ok(self.update_log(id, DeliveryStatus::Pending, |entry| {
            entry.status = DeliveryStatus::Sent;
            entry.sent_at = Some(sent_at);
            entry.metadata.provider_message_id = provider_message_id;
        }))
    }

    async fn mark_failed(&self, id: Uuid, error: String, permanent: bool) -> anyhow::Result<bool> {
        Ok(self.update_log(id, DeliveryStatus::Pending, |entry| {
            entry.status = DeliveryStatus::Failed;
            entry.metadata.last_error = Some(error);
            entry.metadata.permanent_failure = permanent;
        }))
    }

    async fn find_stale_sent(
        &self,
        sent_before: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<LogEntry>> {
        let mut stale: Vec<LogEntry> = self
            .logs
            .read()
            .iter()
            .filter(|entry| {
                entry.status == DeliveryStatus::Sent
                    && entry.delivered_at.is_none()
                    && entry.sent_at.is_some_and(|sent| sent < sent_before)
            })
            .cloned()
            .collect();

        stale.sort_by_key(|entry| entry.sent_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn mark_delivered(&self, id: Uuid, delivered_at: DateTime<Utc>) -> anyhow::Result<bool> {
        Ok(self.update_log(id, DeliveryStatus::Sent, |entry| {
            entry.status = DeliveryStatus::Delivered;
            entry.delivered_at = Some(entry.sent_at.map_or(delivered_at, |s| s.max(delivered_at)));
        }))
    }

    async fn record_unconfirmed_check(
        &self,
        id: Uuid,
        max_checks: u32,
    ) -> anyhow::Result<Option<DeliveryStatus>> {
        let mut status = None;
        self.update_log(id, DeliveryStatus::Sent, |entry| {
            entry.metadata.confirmation_checks += 1;
            if entry.metadata.confirmation_checks >= max_checks {
                entry.status = DeliveryStatus::Unconfirmed;
            }
            status = Some(entry.status);
        });
        Ok(status)
    }

    async fn claim_failed_for_retry(&self, claim: RetryClaim) -> anyhow::Result<Vec<LogEntry>> {
        // one write lock covers both the selection and the stamp
        let mut logs = self.logs.write();

        let mut candidates: Vec<usize> = logs
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.is_retry_eligible()
                    && entry.created_at >= claim.created_after
                    && entry.metadata.retry_attempt < claim.max_attempt
            })
            .map(|(index, _)| index)
            .collect();

        candidates.sort_by_key(|&index| logs[index].created_at);
        candidates.truncate(claim.limit);

        Ok(candidates
            .into_iter()
            .map(|index| {
                logs[index].metadata.retried_at = Some(claim.now);
                logs[index].clone()
            })
            .collect())
    }

    async fn count_by_channel_and_status(
        &self,
        window: StatisticsWindow,
    ) -> anyhow::Result<Vec<ChannelStatusCount>> {
        let mut counts: BTreeMap<(ChannelKind, DeliveryStatus), u64> = BTreeMap::new();
        for entry in self.in_window(window) {
            *counts.entry((entry.channel, entry.status)).or_default() += 1;
        }

        Ok(counts
            .into_iter()
            .map(|((channel, status), count)| ChannelStatusCount {
                channel,
                status,
                count,
            })
            .collect())
    }

    async fn count_by_template(&self, window: StatisticsWindow) -> anyhow::Result<Vec<TemplateCount>> {
        let mut counts: BTreeMap<TemplateKey, u64> = BTreeMap::new();
        for entry in self.in_window(window) {
            if let Some(key) = entry.template_key {
                *counts.entry(key).or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(template_key, count)| TemplateCount {
                template_key,
                count,
            })
            .collect())
    }

    async fn average_delivery_seconds(
        &self,
        window: StatisticsWindow,
    ) -> anyhow::Result<BTreeMap<ChannelKind, f64>> {
        let mut sums: BTreeMap<ChannelKind, (f64, u32)> = BTreeMap::new();
        for entry in self.in_window(window) {
            if let Some(seconds) = entry.delivery_seconds() {
                let (sum, count) = sums.entry(entry.channel).or_default();
                *sum += seconds;
                *count += 1;
            }
        }

        Ok(sums
            .into_iter()
            .map(|(channel, (sum, count))| (channel, sum / f64::from(count)))
            .collect())
    }
}

#[async_trait]
impl BatchStore for InMemoryStore {
    async fn create(&self, batch: &BatchJob) -> anyhow::Result<()> {
        self.batches.write().insert(
            batch.id,
            StoredBatch {
                job: batch.clone(),
                started_at: None,
            },
        );
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<BatchJob>> {
        Ok(self.batches.read().get(&id).map(|stored| stored.job.clone()))
    }

    async fn claim(&self, id: Uuid, started_at: DateTime<Utc>) -> anyhow::Result<Option<BatchJob>> {
        let mut batches = self.batches.write();
        Ok(batches
            .get_mut(&id)
            .filter(|stored| stored.job.status == BatchStatus::Pending && stored.started_at.is_none())
            .map(|stored| {
                stored.started_at = Some(started_at);
                stored.job.clone()
            }))
    }

    async fn complete(&self, id: Uuid, outcome: BatchOutcome) -> anyhow::Result<()> {
        let mut batches = self.batches.write();
        let batch = &mut batches
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("batch {} not found", id))?
            .job;

        batch.status = outcome.status;
        batch.total_recipients = outcome.total_recipients;
        batch.sent_count = outcome.sent_count;
        batch.failed_count = outcome.failed_count;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> anyhow::Result<()> {
        if let Some(stored) = self.batches.write().get_mut(&id) {
            stored.job.status = BatchStatus::Failed;
        }
        Ok(())
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryStore {
    async fn find_active(&self, id: Uuid) -> anyhow::Result<Option<Recipient>> {
        Ok(self
            .recipients
            .read()
            .iter()
            .find(|recipient| recipient.id == id && recipient.active)
            .cloned())
    }

    async fn resolve_audience(&self, audience: &Audience) -> anyhow::Result<Vec<Recipient>> {
        let recipients = self.recipients.read();
        let active = recipients.iter().filter(|recipient| recipient.active);

        Ok(match audience {
            Audience::AllActive => active.cloned().collect(),
            Audience::ActiveWithRole(role) => active
                .filter(|recipient| &recipient.role == role)
                .cloned()
                .collect(),
            Audience::ActiveWithIds(ids) => active
                .filter(|recipient| ids.contains(&recipient.id))
                .cloned()
                .collect(),
            Audience::Nobody => Vec::new(),
        })
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.audit.write().push(record.clone());
        Ok(())
    }
}
