use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::ProviderError,
    models::{channel::ChannelKind, template::Priority},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage<'a> {
    pub address: &'a str,
    pub subject: Option<&'a str>,
    pub body: &'a str,
    pub priority: Priority,
}

/// Transport for one channel. Implementations must bound their own I/O time; the
/// dispatcher adds an outer timeout on top.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Returns the provider's message id on acceptance.
    async fn send(&self, message: OutboundMessage<'_>) -> Result<String, ProviderError>;

    async fn check_delivered(&self, provider_message_id: &str) -> Result<bool, ProviderError>;

    /// Name of the circuit breaker guarding this adapter, if any.
    fn circuit_name(&self) -> Option<String> {
        None
    }
}

#[derive(Clone, Default)]
pub struct ChannelAdapters {
    senders: HashMap<ChannelKind, Arc<dyn ChannelSender>>,
}

impl ChannelAdapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: ChannelKind, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    pub fn get(&self, channel: ChannelKind) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelKind> + '_ {
        self.senders.keys().copied()
    }
}
