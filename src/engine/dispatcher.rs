use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::channel::OutboundMessage,
    engine::NotificationEngine,
    error::{NotifyError, ProviderError},
    formatter,
    models::{
        log::LogEntry,
        recipient::Recipient,
        request::{Content, SendRequest},
        status::DeliveryStatus,
        template::{Priority, TemplateKey},
    },
};

struct ResolvedContent {
    template_key: Option<TemplateKey>,
    subject: Option<String>,
    raw_body: String,
    priority: Priority,
}

impl NotificationEngine {
    /// Sends one notification to one recipient over one channel.
    ///
    /// Content, channel and recipient problems are returned as errors before anything
    /// is stored. Past that point exactly one log entry is written and returned,
    /// whatever the provider says.
    pub async fn send(&self, request: SendRequest) -> Result<LogEntry, NotifyError> {
        let content = self.resolve_content(&request)?;

        if !self.channels.is_enabled(request.channel) {
            return Err(NotifyError::ChannelDisabled(request.channel));
        }

        let recipient = self
            .recipients
            .find_active(request.recipient_id)
            .await?
            .ok_or(NotifyError::RecipientNotFound(request.recipient_id))?;

        let body = formatter::format_for_channel(request.channel, &content.raw_body, content.priority);

        let entry = LogEntry::pending(
            recipient.id,
            request.channel,
            content.template_key,
            content.subject,
            body,
            content.priority,
            self.clock.now(),
        )
        .with_metadata(request.metadata.caller_supplied());

        self.logs.insert(&entry).await?;

        debug!(
            log_id = %entry.id,
            recipient_id = %recipient.id,
            channel = %entry.channel,
            priority = %entry.priority,
            "Notification persisted, dispatching"
        );

        self.deliver(entry, Some(&recipient)).await
    }

    /// Sends a copy of an earlier attempt as a new log entry with the next attempt
    /// number. The stored body is already formatted and goes out unchanged.
    pub async fn redeliver(&self, original: &LogEntry) -> Result<LogEntry, NotifyError> {
        let recipient = self.recipients.find_active(original.recipient_id).await?;

        let entry = LogEntry {
            id: Uuid::new_v4(),
            status: DeliveryStatus::Pending,
            created_at: self.clock.now(),
            sent_at: None,
            delivered_at: None,
            metadata: original.metadata.next_attempt(),
            ..original.clone()
        };

        self.logs.insert(&entry).await?;

        info!(
            log_id = %entry.id,
            original_id = %original.id,
            retry_attempt = entry.metadata.retry_attempt,
            "Retrying failed notification"
        );

        self.deliver(entry, recipient.as_ref()).await
    }

    /// Stores a FAILED entry for a request refused before dispatch. Only refusals that
    /// a later attempt could get past (store or directory outages) stay retry-eligible.
    pub async fn record_rejection(
        &self,
        request: &SendRequest,
        error: &NotifyError,
    ) -> Result<LogEntry, NotifyError> {
        let mut entry = match self.resolve_content(request) {
            Ok(content) => LogEntry::pending(
                request.recipient_id,
                request.channel,
                content.template_key,
                content.subject,
                formatter::format_for_channel(request.channel, &content.raw_body, content.priority),
                content.priority,
                self.clock.now(),
            ),
            Err(_) => LogEntry::pending(
                request.recipient_id,
                request.channel,
                request.template_key(),
                None,
                String::new(),
                request.priority.unwrap_or_default(),
                self.clock.now(),
            ),
        }
        .with_metadata(request.metadata.caller_supplied());
        entry.status = DeliveryStatus::Failed;
        entry.metadata.last_error = Some(error.to_string());
        entry.metadata.permanent_failure = error.is_permanent();

        self.logs.insert(&entry).await?;

        warn!(
            log_id = %entry.id,
            recipient_id = %entry.recipient_id,
            channel = %entry.channel,
            error = %error,
            "Notification rejected before dispatch"
        );

        Ok(entry)
    }

    /// Runs the provider call and records the outcome. A failed status write is logged
    /// and the entry is still returned; the provider call has already happened.
    async fn deliver(
        &self,
        mut entry: LogEntry,
        recipient: Option<&Recipient>,
    ) -> Result<LogEntry, NotifyError> {
        match self.attempt(&entry, recipient).await {
            Ok(provider_message_id) => {
                let sent_at = self.clock.now();
                match self
                    .logs
                    .mark_sent(entry.id, sent_at, Some(provider_message_id.clone()))
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(log_id = %entry.id, "Log entry left PENDING before it could be marked sent")
                    }
                    Err(e) => {
                        error!(log_id = %entry.id, error = %e, "Failed to record sent notification")
                    }
                }

                entry.status = DeliveryStatus::Sent;
                entry.sent_at = Some(sent_at);
                entry.metadata.provider_message_id = Some(provider_message_id);

                info!(
                    log_id = %entry.id,
                    channel = %entry.channel,
                    provider_message_id = ?entry.metadata.provider_message_id,
                    "Notification sent"
                );
            }
            Err(e) => {
                let permanent = e.is_permanent();
                match self
                    .logs
                    .mark_failed(entry.id, e.to_string(), permanent)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(log_id = %entry.id, "Log entry left PENDING before it could be marked failed")
                    }
                    Err(store_err) => {
                        error!(log_id = %entry.id, error = %store_err, "Failed to record failed notification")
                    }
                }

                entry.status = DeliveryStatus::Failed;
                entry.metadata.last_error = Some(e.to_string());
                entry.metadata.permanent_failure = permanent;

                warn!(
                    log_id = %entry.id,
                    channel = %entry.channel,
                    permanent,
                    error = %e,
                    "Notification failed"
                );
            }
        }

        Ok(entry)
    }

    fn resolve_content(&self, request: &SendRequest) -> Result<ResolvedContent, NotifyError> {
        let content = match &request.content {
            Content::Template { key, variables } => {
                let (template, rendered) = self.templates.render(*key, variables)?;
                ResolvedContent {
                    template_key: Some(*key),
                    subject: rendered.subject,
                    raw_body: rendered.body,
                    priority: request.priority.unwrap_or(template.default_priority),
                }
            }
            Content::Custom { subject, body } => ResolvedContent {
                template_key: None,
                subject: subject.clone(),
                raw_body: body.clone(),
                priority: request.priority.unwrap_or_default(),
            },
        };

        Ok(content)
    }

    async fn attempt(
        &self,
        entry: &LogEntry,
        recipient: Option<&Recipient>,
    ) -> Result<String, ProviderError> {
        let channel = self.channels.get(entry.channel);
        if !channel.enabled {
            return Err(ProviderError::Permanent(format!(
                "channel {} is disabled",
                entry.channel
            )));
        }

        let recipient = recipient.ok_or_else(|| {
            ProviderError::Permanent("recipient not found or inactive".to_string())
        })?;

        let address = recipient.address_for(entry.channel).ok_or_else(|| {
            ProviderError::Permanent(format!("recipient has no {} address", entry.channel))
        })?;

        let sender = self.adapters.get(entry.channel).ok_or_else(|| {
            ProviderError::Permanent(format!("no adapter registered for {}", entry.channel))
        })?;

        if let Some(limit) = channel.rate_limit {
            let acquired = self
                .rate_limiter
                .try_acquire(entry.channel, limit, self.clock.now())
                .await
                .map_err(|e| ProviderError::Transient(format!("rate limiter unavailable: {}", e)))?;

            if !acquired {
                return Err(ProviderError::Transient(format!(
                    "rate limit exceeded for {}",
                    entry.channel
                )));
            }
        }

        let message = OutboundMessage {
            address,
            subject: entry.subject.as_deref(),
            body: &entry.body,
            priority: entry.priority,
        };

        match timeout(self.settings.send_timeout, sender.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Transient(format!(
                "send timed out after {}ms",
                self.settings.send_timeout.as_millis()
            ))),
        }
    }
}
