use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue, json};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    models::{
        audit::AuditRecord,
        batch::{Audience, BatchJob, BatchOutcome, TargetType},
        channel::ChannelKind,
        log::{LogEntry, LogMetadata},
        recipient::Recipient,
        statistics::{ChannelStatusCount, StatisticsWindow, TemplateCount},
        status::{BatchStatus, DeliveryStatus},
        template::{Priority, TemplateKey},
    },
    store::{AuditSink, BatchStore, LogStore, RecipientDirectory, RetryClaim},
};

const SCHEMA: &str = include_str!("../../migrations/001_notification_engine.sql");

const LOG_COLUMNS: &str = "id, recipient_id, channel, template_key, subject, body, priority, \
    status, created_at, sent_at, delivered_at, retry_attempt, retried_at, last_error, \
    permanent_failure, provider_message_id, confirmation_checks, batch_id, extra";

const BATCH_COLUMNS: &str = "id, template_key, target_type, target_role, target_ids, channels, \
    variables, priority, status, total_recipients, sent_count, failed_count, created_by";

const USER_COLUMNS: &str = "id, email, phone, push_token, role, active";

/// Postgres implementation of every persistence port.
pub struct PgStore {
    client: Client,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Schema migration failed: {}", e))?;

        info!("Database schema is up to date");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }

    /// Inserts or refreshes a host user row.
    pub async fn upsert_recipient(&self, recipient: &Recipient) -> Result<(), Error> {
        self.client
            .execute(
                "INSERT INTO users (id, email, phone, push_token, role, active) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, phone = EXCLUDED.phone, \
                 push_token = EXCLUDED.push_token, role = EXCLUDED.role, active = EXCLUDED.active",
                &[
                    &recipient.id,
                    &recipient.email,
                    &recipient.phone,
                    &recipient.push_token,
                    &recipient.role,
                    &recipient.active,
                ],
            )
            .await?;

        Ok(())
    }
}

fn parse_column<T>(row: &Row, column: &str) -> Result<T, Error>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| anyhow!("column {}: {}", column, e))
}

fn log_from_row(row: &Row) -> Result<LogEntry, Error> {
    let template_key = row
        .try_get::<_, Option<String>>("template_key")?
        .map(|key| key.parse::<TemplateKey>())
        .transpose()
        .map_err(|key| anyhow!("unknown template key '{}'", key))?;

    let extra = match row.try_get::<_, JsonValue>("extra")? {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    };

    Ok(LogEntry {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        channel: parse_column::<ChannelKind>(row, "channel")?,
        template_key,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        priority: parse_column::<Priority>(row, "priority")?,
        status: parse_column::<DeliveryStatus>(row, "status")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
        delivered_at: row.try_get("delivered_at")?,
        metadata: LogMetadata {
            retry_attempt: row.try_get::<_, i32>("retry_attempt")?.max(0) as u32,
            retried_at: row.try_get("retried_at")?,
            last_error: row.try_get("last_error")?,
            permanent_failure: row.try_get("permanent_failure")?,
            provider_message_id: row.try_get("provider_message_id")?,
            confirmation_checks: row.try_get::<_, i32>("confirmation_checks")?.max(0) as u32,
            batch_id: row.try_get("batch_id")?,
            extra,
        },
    })
}

fn batch_from_row(row: &Row) -> Result<BatchJob, Error> {
    let channels = row
        .try_get::<_, Vec<String>>("channels")?
        .iter()
        .map(|channel| channel.parse::<ChannelKind>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!(e))?;

    let variables: HashMap<String, JsonValue> =
        serde_json::from_value(row.try_get::<_, JsonValue>("variables")?)
            .context("batch variables are not a JSON object")?;

    let priority = row
        .try_get::<_, Option<String>>("priority")?
        .map(|p| p.parse::<Priority>())
        .transpose()
        .map_err(|e| anyhow!(e))?;

    Ok(BatchJob {
        id: row.try_get("id")?,
        template_key: row.try_get("template_key")?,
        target_type: TargetType::parse(&row.try_get::<_, String>("target_type")?),
        target_role: row.try_get("target_role")?,
        target_ids: row.try_get("target_ids")?,
        channels,
        variables,
        priority,
        status: parse_column::<BatchStatus>(row, "status")?,
        total_recipients: row.try_get::<_, i32>("total_recipients")?.max(0) as u32,
        sent_count: row.try_get::<_, i32>("sent_count")?.max(0) as u32,
        failed_count: row.try_get::<_, i32>("failed_count")?.max(0) as u32,
        created_by: row.try_get("created_by")?,
    })
}

fn recipient_from_row(row: &Row) -> Result<Recipient, Error> {
    Ok(Recipient {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        push_token: row.try_get("push_token")?,
        role: row.try_get("role")?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl LogStore for PgStore {
    async fn insert(&self, entry: &LogEntry) -> Result<()> {
        let metadata = &entry.metadata;
        let extra = JsonValue::Object(metadata.extra.clone());

        self.client
            .execute(
                &format!(
                    "INSERT INTO notification_logs ({}) VALUES \
                     ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
                    LOG_COLUMNS
                ),
                &[
                    &entry.id,
                    &entry.recipient_id,
                    &entry.channel.as_str(),
                    &entry.template_key.map(|key| key.as_str()),
                    &entry.subject,
                    &entry.body,
                    &entry.priority.as_str(),
                    &entry.status.as_str(),
                    &entry.created_at,
                    &entry.sent_at,
                    &entry.delivered_at,
                    &(metadata.retry_attempt as i32),
                    &metadata.retried_at,
                    &metadata.last_error,
                    &metadata.permanent_failure,
                    &metadata.provider_message_id,
                    &(metadata.confirmation_checks as i32),
                    &metadata.batch_id,
                    &extra,
                ],
            )
            .await
            .map_err(|e| {
                error!(error = %e, log_id = %entry.id, "Failed to write notification log");
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(log_id = %entry.id, status = %entry.status, "Notification log written");
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<LogEntry>> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {} FROM notification_logs WHERE id = $1", LOG_COLUMNS),
                &[&id],
            )
            .await?;

        row.as_ref().map(log_from_row).transpose()
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        provider_message_id: Option<String>,
    ) -> Result<bool> {
        let updated = self
            .client
            .execute(
                "UPDATE notification_logs SET status = 'SENT', sent_at = $2, provider_message_id = $3 \
                 WHERE id = $1 AND status = 'PENDING'",
                &[&id, &sent_at, &provider_message_id],
            )
            .await?;

        Ok(updated == 1)
    }

    async fn mark_failed(&self, id: Uuid, error: String, permanent: bool) -> Result<bool> {
        let updated = self
            .client
            .execute(
                "UPDATE notification_logs SET status = 'FAILED', last_error = $2, permanent_failure = $3 \
                 WHERE id = $1 AND status = 'PENDING'",
                &[&id, &error, &permanent],
            )
            .await?;

        Ok(updated == 1)
    }

    async fn find_stale_sent(&self, sent_before: DateTime<Utc>, limit: usize) -> Result<Vec<LogEntry>> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {} FROM notification_logs \
                     WHERE status = 'SENT' AND delivered_at IS NULL AND sent_at < $1 \
                     ORDER BY sent_at LIMIT $2",
                    LOG_COLUMNS
                ),
                &[&sent_before, &(limit as i64)],
            )
            .await?;

        rows.iter().map(log_from_row).collect()
    }

    async fn mark_delivered(&self, id: Uuid, delivered_at: DateTime<Utc>) -> Result<bool> {
        let updated = self
            .client
            .execute(
                "UPDATE notification_logs SET status = 'DELIVERED', delivered_at = GREATEST($2, sent_at) \
                 WHERE id = $1 AND status = 'SENT'",
                &[&id, &delivered_at],
            )
            .await?;

        Ok(updated == 1)
    }

    async fn record_unconfirmed_check(
        &self,
        id: Uuid,
        max_checks: u32,
    ) -> Result<Option<DeliveryStatus>> {
        let row = self
            .client
            .query_opt(
                "UPDATE notification_logs SET confirmation_checks = confirmation_checks + 1, \
                 status = CASE WHEN confirmation_checks + 1 >= $2 THEN 'UNCONFIRMED' ELSE status END \
                 WHERE id = $1 AND status = 'SENT' RETURNING status",
                &[&id, &(max_checks as i32)],
            )
            .await?;

        row.as_ref()
            .map(|row| parse_column::<DeliveryStatus>(row, "status"))
            .transpose()
    }

    async fn claim_failed_for_retry(&self, claim: RetryClaim) -> Result<Vec<LogEntry>> {
        // Rows locked by a concurrent sweep are skipped, never double-claimed.
        let rows = self
            .client
            .query(
                &format!(
                    "UPDATE notification_logs SET retried_at = $1 WHERE id IN ( \
                         SELECT id FROM notification_logs \
                         WHERE status = 'FAILED' AND retried_at IS NULL AND NOT permanent_failure \
                           AND created_at >= $2 AND retry_attempt < $3 \
                         ORDER BY created_at LIMIT $4 \
                         FOR UPDATE SKIP LOCKED) \
                     RETURNING {}",
                    LOG_COLUMNS
                ),
                &[
                    &claim.now,
                    &claim.created_after,
                    &(claim.max_attempt as i32),
                    &(claim.limit as i64),
                ],
            )
            .await?;

        let mut claimed = rows.iter().map(log_from_row).collect::<Result<Vec<_>>>()?;
        claimed.sort_by_key(|entry| entry.created_at);
        Ok(claimed)
    }

    async fn count_by_channel_and_status(
        &self,
        window: StatisticsWindow,
    ) -> Result<Vec<ChannelStatusCount>> {
        let rows = self
            .client
            .query(
                "SELECT channel, status, COUNT(*) AS count FROM notification_logs \
                 WHERE created_at BETWEEN $1 AND $2 \
                 GROUP BY channel, status ORDER BY channel, status",
                &[&window.start, &window.end],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<ChannelStatusCount> {
                Ok(ChannelStatusCount {
                    channel: parse_column(row, "channel")?,
                    status: parse_column(row, "status")?,
                    count: row.try_get::<_, i64>("count")?.max(0) as u64,
                })
            })
            .collect()
    }

    async fn count_by_template(&self, window: StatisticsWindow) -> Result<Vec<TemplateCount>> {
        let rows = self
            .client
            .query(
                "SELECT template_key, COUNT(*) AS count FROM notification_logs \
                 WHERE created_at BETWEEN $1 AND $2 AND template_key IS NOT NULL \
                 GROUP BY template_key ORDER BY template_key",
                &[&window.start, &window.end],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<TemplateCount> {
                Ok(TemplateCount {
                    template_key: parse_column(row, "template_key")?,
                    count: row.try_get::<_, i64>("count")?.max(0) as u64,
                })
            })
            .collect()
    }

    async fn average_delivery_seconds(
        &self,
        window: StatisticsWindow,
    ) -> Result<BTreeMap<ChannelKind, f64>> {
        let rows = self
            .client
            .query(
                "SELECT channel, AVG(EXTRACT(EPOCH FROM (delivered_at - sent_at)))::float8 AS avg_seconds \
                 FROM notification_logs \
                 WHERE created_at BETWEEN $1 AND $2 AND sent_at IS NOT NULL AND delivered_at IS NOT NULL \
                 GROUP BY channel",
                &[&window.start, &window.end],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<(ChannelKind, f64)> {
                Ok((parse_column(row, "channel")?, row.try_get("avg_seconds")?))
            })
            .collect()
    }
}

#[async_trait]
impl BatchStore for PgStore {
    async fn create(&self, batch: &BatchJob) -> Result<()> {
        let channels: Vec<&str> = batch.channels.iter().map(|c| c.as_str()).collect();
        let variables = serde_json::to_value(&batch.variables)?;

        self.client
            .execute(
                &format!(
                    "INSERT INTO notification_batches ({}) VALUES \
                     ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                    BATCH_COLUMNS
                ),
                &[
                    &batch.id,
                    &batch.template_key,
                    &batch.target_type.as_str(),
                    &batch.target_role,
                    &batch.target_ids,
                    &channels,
                    &variables,
                    &batch.priority.map(|p| p.as_str()),
                    &batch.status.as_str(),
                    &(batch.total_recipients as i32),
                    &(batch.sent_count as i32),
                    &(batch.failed_count as i32),
                    &batch.created_by,
                ],
            )
            .await?;

        debug!(batch_id = %batch.id, "Batch created");
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BatchJob>> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {} FROM notification_batches WHERE id = $1", BATCH_COLUMNS),
                &[&id],
            )
            .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn claim(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<Option<BatchJob>> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "UPDATE notification_batches SET started_at = $2 \
                     WHERE id = $1 AND status = 'PENDING' AND started_at IS NULL \
                     RETURNING {}",
                    BATCH_COLUMNS
                ),
                &[&id, &started_at],
            )
            .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn complete(&self, id: Uuid, outcome: BatchOutcome) -> Result<()> {
        let updated = self
            .client
            .execute(
                "UPDATE notification_batches SET status = $2, total_recipients = $3, \
                 sent_count = $4, failed_count = $5, completed_at = NOW() WHERE id = $1",
                &[
                    &id,
                    &outcome.status.as_str(),
                    &(outcome.total_recipients as i32),
                    &(outcome.sent_count as i32),
                    &(outcome.failed_count as i32),
                ],
            )
            .await?;

        if updated == 0 {
            return Err(anyhow!("batch {} not found", id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<()> {
        self.client
            .execute(
                "UPDATE notification_batches SET status = 'FAILED', completed_at = NOW() WHERE id = $1",
                &[&id],
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl RecipientDirectory for PgStore {
    async fn find_active(&self, id: Uuid) -> Result<Option<Recipient>> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {} FROM users WHERE id = $1 AND active", USER_COLUMNS),
                &[&id],
            )
            .await?;

        row.as_ref().map(recipient_from_row).transpose()
    }

    async fn resolve_audience(&self, audience: &Audience) -> Result<Vec<Recipient>> {
        let rows = match audience {
            Audience::AllActive => {
                self.client
                    .query(
                        &format!("SELECT {} FROM users WHERE active ORDER BY id", USER_COLUMNS),
                        &[],
                    )
                    .await?
            }
            Audience::ActiveWithRole(role) => {
                self.client
                    .query(
                        &format!(
                            "SELECT {} FROM users WHERE active AND role = $1 ORDER BY id",
                            USER_COLUMNS
                        ),
                        &[role],
                    )
                    .await?
            }
            Audience::ActiveWithIds(ids) => {
                self.client
                    .query(
                        &format!(
                            "SELECT {} FROM users WHERE active AND id = ANY($1) ORDER BY id",
                            USER_COLUMNS
                        ),
                        &[ids],
                    )
                    .await?
            }
            Audience::Nobody => return Ok(Vec::new()),
        };

        rows.iter().map(recipient_from_row).collect()
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        let details = json!({
            "templateKey": record.template_key,
            "recipientsCount": record.recipients_count,
            "sentCount": record.sent_count,
            "failedCount": record.failed_count,
        });

        self.client
            .execute(
                "INSERT INTO audit_logs (action, entity_type, entity_id, user_id, details, created_at) \
                 VALUES ($1, 'notification_batch', $2, $3, $4, $5)",
                &[
                    &record.action,
                    &record.batch_id,
                    &record.initiating_user,
                    &details,
                    &record.recorded_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(error = %e, batch_id = %record.batch_id, "Failed to write audit log to database");
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(batch_id = %record.batch_id, action = %record.action, "Audit log written to database");
        Ok(())
    }
}
