//! The notification engine: single sends, batch fan-out, and the two background
//! sweeps that confirm deliveries and retry failures.
//!
//! Collaborators are injected as trait objects: Postgres and Redis in production,
//! in-memory ports in tests.

pub mod batch;
pub mod delivery_monitor;
pub mod dispatcher;
pub mod retry_manager;
pub mod scheduler;
pub mod statistics;

use std::{sync::Arc, time::Duration as StdDuration};

use chrono::Duration;
use serde::Serialize;
use tracing::warn;

use crate::{
    clients::{channel::ChannelAdapters, template::TemplateRegistry},
    clock::{Clock, SystemClock},
    models::channel::ChannelCatalog,
    rate_limit::{InMemoryRateLimiter, RateLimiter},
    store::{AuditSink, BatchStore, InMemoryStore, LogStore, RecipientDirectory},
};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on a single adapter call, send or confirmation.
    pub send_timeout: StdDuration,
    pub delivery_stale_after: Duration,
    pub delivery_max_checks: u32,
    pub delivery_sweep_batch_size: usize,
    pub retry_lookback: Duration,
    pub retry_batch_size: usize,
    pub retry_max_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            send_timeout: StdDuration::from_secs(10),
            delivery_stale_after: Duration::minutes(5),
            delivery_max_checks: 12,
            delivery_sweep_batch_size: 200,
            retry_lookback: Duration::hours(24),
            retry_batch_size: 50,
            retry_max_attempts: 5,
        }
    }
}

/// Tally of one sweep run.
///
/// For the delivery sweep `succeeded` counts confirmed deliveries and `failed` the
/// entries that gave up as UNCONFIRMED; for the retry sweep they count resends that
/// went out and resends that failed again.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Storage and infrastructure ports the engine depends on.
#[derive(Clone)]
pub struct EnginePorts {
    pub logs: Arc<dyn LogStore>,
    pub batches: Arc<dyn BatchStore>,
    pub recipients: Arc<dyn RecipientDirectory>,
    pub audit: Arc<dyn AuditSink>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub clock: Arc<dyn Clock>,
}

impl EnginePorts {
    /// Every port backed by one in-memory store, with a local rate limiter and the
    /// system clock.
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            logs: store.clone(),
            batches: store.clone(),
            recipients: store.clone(),
            audit: store,
            rate_limiter: Arc::new(InMemoryRateLimiter::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }
}

pub struct NotificationEngine {
    templates: TemplateRegistry,
    channels: ChannelCatalog,
    adapters: ChannelAdapters,
    logs: Arc<dyn LogStore>,
    batches: Arc<dyn BatchStore>,
    recipients: Arc<dyn RecipientDirectory>,
    audit: Arc<dyn AuditSink>,
    rate_limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl NotificationEngine {
    pub fn new(
        ports: EnginePorts,
        channels: ChannelCatalog,
        adapters: ChannelAdapters,
        settings: EngineSettings,
    ) -> Self {
        for config in channels.iter() {
            if config.enabled && adapters.get(config.kind).is_none() {
                warn!(channel = %config.kind, "Channel is enabled but has no adapter");
            }
        }

        Self {
            templates: TemplateRegistry::default(),
            channels,
            adapters,
            logs: ports.logs,
            batches: ports.batches,
            recipients: ports.recipients,
            audit: ports.audit,
            rate_limiter: ports.rate_limiter,
            clock: ports.clock,
            settings,
        }
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn channels(&self) -> &ChannelCatalog {
        &self.channels
    }

    pub fn adapters(&self) -> &ChannelAdapters {
        &self.adapters
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}
