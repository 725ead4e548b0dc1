use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    engine::NotificationEngine,
    error::NotifyError,
    models::{
        audit::AuditRecord,
        batch::{BatchJob, BatchOutcome, NewBatch},
        channel::ChannelKind,
        log::LogMetadata,
        recipient::Recipient,
        request::SendRequest,
        status::DeliveryStatus,
        template::TemplateKey,
    },
};

struct PreparedBatch {
    template_key: TemplateKey,
    channels: Vec<ChannelKind>,
    recipients: Vec<Recipient>,
}

impl NotificationEngine {
    /// Stores a PENDING batch after checking its template and variables.
    pub async fn create_batch(&self, new_batch: NewBatch) -> Result<BatchJob, NotifyError> {
        self.templates.render(new_batch.template_key, &new_batch.variables)?;

        let batch = new_batch.into_job();
        self.batches.create(&batch).await?;

        info!(
            batch_id = %batch.id,
            template_key = %batch.template_key,
            target_type = batch.target_type.as_str(),
            "Batch created"
        );

        Ok(batch)
    }

    /// Fans a stored batch out to its audience, one recipient at a time.
    ///
    /// A failing recipient never stops the loop. The batch ends FAILED only when every
    /// recipient failed; setup errors mark it FAILED and are returned. A batch that was
    /// already started or finished is returned as stored without sending anything.
    pub async fn run_batch(&self, batch_id: Uuid) -> Result<BatchJob, NotifyError> {
        let batch = match self.batches.claim(batch_id, self.clock.now()).await? {
            Some(batch) => batch,
            None => {
                let existing = self
                    .batches
                    .find_by_id(batch_id)
                    .await?
                    .ok_or(NotifyError::BatchNotFound(batch_id))?;
                info!(
                    batch_id = %batch_id,
                    status = %existing.status,
                    "Batch already started, skipping"
                );
                return Ok(existing);
            }
        };

        let prepared = match self.prepare_batch(&batch).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "Batch setup failed");
                if let Err(mark_err) = self.batches.mark_failed(batch_id).await {
                    error!(batch_id = %batch_id, error = %mark_err, "Failed to mark batch as failed");
                }
                return Err(e);
            }
        };

        info!(
            batch_id = %batch_id,
            recipients = prepared.recipients.len(),
            channels = ?prepared.channels,
            "Running batch"
        );

        let mut sent_count = 0u32;
        let mut failed_count = 0u32;

        for recipient in &prepared.recipients {
            if self.send_to_recipient(&batch, &prepared, recipient).await {
                sent_count += 1;
            } else {
                failed_count += 1;
            }
        }

        let outcome = BatchOutcome::from_counts(sent_count, failed_count);
        self.batches.complete(batch_id, outcome).await?;

        let record = AuditRecord::batch_sent(
            batch_id,
            batch.template_key.clone(),
            batch.created_by,
            &outcome,
            self.clock.now(),
        );
        if let Err(e) = self.audit.record(&record).await {
            warn!(batch_id = %batch_id, error = %e, "Failed to write audit log");
        }

        info!(
            batch_id = %batch_id,
            status = %outcome.status,
            sent_count,
            failed_count,
            "Batch completed"
        );

        Ok(BatchJob {
            status: outcome.status,
            total_recipients: outcome.total_recipients,
            sent_count: outcome.sent_count,
            failed_count: outcome.failed_count,
            ..batch
        })
    }

    async fn prepare_batch(&self, batch: &BatchJob) -> Result<PreparedBatch, NotifyError> {
        let template = self.templates.lookup_str(&batch.template_key)?;

        let channels = if batch.channels.is_empty() {
            template.default_channels.clone()
        } else {
            batch.channels.clone()
        };

        let recipients = self.recipients.resolve_audience(&batch.audience()).await?;

        Ok(PreparedBatch {
            template_key: template.key,
            channels,
            recipients,
        })
    }

    /// True when at least one channel ended SENT for this recipient.
    async fn send_to_recipient(
        &self,
        batch: &BatchJob,
        prepared: &PreparedBatch,
        recipient: &Recipient,
    ) -> bool {
        let mut delivered_somewhere = false;

        for &channel in &prepared.channels {
            let mut request = SendRequest::template(
                recipient.id,
                channel,
                prepared.template_key,
                batch.variables.clone(),
            )
            .with_metadata(LogMetadata::default().with_batch(batch.id));
            if let Some(priority) = batch.priority {
                request = request.with_priority(priority);
            }

            match self.send(request.clone()).await {
                Ok(entry) => delivered_somewhere |= entry.status == DeliveryStatus::Sent,
                Err(e) => {
                    warn!(
                        batch_id = %batch.id,
                        recipient_id = %recipient.id,
                        channel = %channel,
                        error = %e,
                        "Batch recipient rejected"
                    );
                    if let Err(log_err) = self.record_rejection(&request, &e).await {
                        error!(
                            batch_id = %batch.id,
                            recipient_id = %recipient.id,
                            error = %log_err,
                            "Failed to record batch rejection"
                        );
                    }
                }
            }
        }

        delivered_somewhere
    }
}
