#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use notification_engine::{
    clients::channel::{ChannelAdapters, ChannelSender, OutboundMessage},
    clock::ManualClock,
    engine::{EnginePorts, EngineSettings, NotificationEngine},
    error::ProviderError,
    models::{
        channel::{ChannelCatalog, ChannelKind},
        log::LogEntry,
        recipient::Recipient,
        status::DeliveryStatus,
        template::Priority,
    },
    store::{InMemoryStore, LogStore},
};
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub address: String,
    pub subject: Option<String>,
    pub body: String,
    pub priority: Priority,
}

/// Channel adapter that records what it was asked to send.
#[derive(Default)]
pub struct FakeSender {
    sent: Mutex<Vec<SentMessage>>,
    failures: Mutex<HashMap<String, ProviderError>>,
    delivered: Mutex<bool>,
    hang: Mutex<bool>,
}

impl FakeSender {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(true),
            ..Default::default()
        }
    }

    pub fn fail_address(&self, address: &str, error: ProviderError) {
        self.failures.lock().insert(address.to_string(), error);
    }

    pub fn set_delivered(&self, delivered: bool) {
        *self.delivered.lock() = delivered;
    }

    pub fn hang(&self) {
        *self.hang.lock() = true;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChannelSender for FakeSender {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<String, ProviderError> {
        let hang = *self.hang.lock();
        if hang {
            std::future::pending::<()>().await;
        }

        if let Some(error) = self.failures.lock().get(message.address) {
            return Err(error.clone());
        }

        let mut sent = self.sent.lock();
        sent.push(SentMessage {
            address: message.address.to_string(),
            subject: message.subject.map(str::to_string),
            body: message.body.to_string(),
            priority: message.priority,
        });
        Ok(format!("msg-{}", sent.len()))
    }

    async fn check_delivered(&self, _provider_message_id: &str) -> Result<bool, ProviderError> {
        Ok(*self.delivered.lock())
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
}

pub fn recipient(role: &str) -> Recipient {
    let id = Uuid::new_v4();
    Recipient {
        id,
        email: Some(format!("{}@example.com", id.simple())),
        phone: Some(format!("+39333{}", &id.simple().to_string()[..7])),
        push_token: Some(format!("fcm-token-{}", id.simple())),
        role: role.to_string(),
        active: true,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub sender: Arc<FakeSender>,
    pub engine: Arc<NotificationEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(ChannelCatalog::all_enabled(), EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        Self::with(ChannelCatalog::all_enabled(), settings)
    }

    pub fn with_catalog(catalog: ChannelCatalog) -> Self {
        Self::with(catalog, EngineSettings::default())
    }

    pub fn with(catalog: ChannelCatalog, settings: EngineSettings) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let sender = Arc::new(FakeSender::new());

        let adapters = ChannelKind::ALL
            .into_iter()
            .fold(ChannelAdapters::new(), |adapters, channel| {
                adapters.with(channel, sender.clone())
            });

        let engine = NotificationEngine::new(
            EnginePorts::in_memory(store.clone()).with_clock(clock.clone()),
            catalog,
            adapters,
            settings,
        );

        Self {
            store,
            clock,
            sender,
            engine: Arc::new(engine),
        }
    }

    pub fn add_recipient(&self, role: &str) -> Recipient {
        let recipient = recipient(role);
        self.store.add_recipient(recipient.clone());
        recipient
    }

    /// Writes an entry straight to the store, bypassing the dispatcher.
    pub async fn seed(&self, entry: LogEntry) -> LogEntry {
        self.store.insert(&entry).await.unwrap();
        entry
    }
}

pub fn entry_for(recipient: &Recipient, channel: ChannelKind, created_at: DateTime<Utc>) -> LogEntry {
    LogEntry::pending(
        recipient.id,
        channel,
        None,
        Some("Subject".to_string()),
        "Body".to_string(),
        Priority::Normal,
        created_at,
    )
}

pub fn failed_entry(recipient: &Recipient, created_at: DateTime<Utc>) -> LogEntry {
    let mut entry = entry_for(recipient, ChannelKind::Email, created_at);
    entry.status = DeliveryStatus::Failed;
    entry.metadata.last_error = Some("gateway unreachable".to_string());
    entry
}

pub fn sent_entry(recipient: &Recipient, sent_at: DateTime<Utc>) -> LogEntry {
    let mut entry = entry_for(recipient, ChannelKind::Email, sent_at);
    entry.status = DeliveryStatus::Sent;
    entry.sent_at = Some(sent_at);
    entry.metadata.provider_message_id = Some(format!("provider-{}", entry.id.simple()));
    entry
}
