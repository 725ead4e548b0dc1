use anyhow::{Error, Result, anyhow};
use chrono::Duration;
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    engine::EngineSettings,
    models::{
        channel::{ChannelCatalog, ChannelConfig, ChannelKind},
        circuit_breaker::CircuitBreakerConfig,
        retry::RetryConfig,
    },
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,

    pub rabbitmq_url: String,
    #[serde(default = "default_batch_queue_name")]
    pub batch_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    pub fcm_project_id: Option<String>,
    pub email_gateway_url: Option<String>,
    pub sms_gateway_url: Option<String>,
    pub chat_gateway_url: Option<String>,
    pub gateway_api_key: Option<String>,

    #[serde(default = "enabled")]
    pub push_enabled: bool,
    #[serde(default = "enabled")]
    pub email_enabled: bool,
    #[serde(default = "enabled")]
    pub sms_enabled: bool,
    #[serde(default = "enabled")]
    pub chat_enabled: bool,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_delivery_sweep_interval_seconds")]
    pub delivery_sweep_interval_seconds: u64,
    #[serde(default = "default_delivery_stale_after_seconds")]
    pub delivery_stale_after_seconds: i64,
    #[serde(default = "default_delivery_max_checks")]
    pub delivery_max_checks: u32,
    #[serde(default = "default_delivery_sweep_batch_size")]
    pub delivery_sweep_batch_size: usize,

    #[serde(default = "default_retry_sweep_interval_seconds")]
    pub retry_sweep_interval_seconds: u64,
    #[serde(default = "default_retry_lookback_hours")]
    pub retry_lookback_hours: i64,
    #[serde(default = "default_retry_batch_size")]
    pub retry_batch_size: usize,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_circuit_breaker_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    #[serde(default = "default_http_retry_attempts")]
    pub http_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,
}

fn default_batch_queue_name() -> String {
    "notification.batches".to_string()
}
fn default_prefetch_count() -> u16 {
    1
}
fn default_server_port() -> u16 {
    8080
}
fn enabled() -> bool {
    true
}
fn default_send_timeout_ms() -> u64 {
    10_000
}
fn default_delivery_sweep_interval_seconds() -> u64 {
    300
}
fn default_delivery_stale_after_seconds() -> i64 {
    300
}
fn default_delivery_max_checks() -> u32 {
    12
}
fn default_delivery_sweep_batch_size() -> usize {
    200
}
fn default_retry_sweep_interval_seconds() -> u64 {
    600
}
fn default_retry_lookback_hours() -> i64 {
    24
}
fn default_retry_batch_size() -> usize {
    50
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}
fn default_circuit_breaker_timeout_seconds() -> u64 {
    60
}
fn default_circuit_breaker_success_threshold() -> u32 {
    2
}
fn default_http_retry_attempts() -> u32 {
    3
}
fn default_initial_retry_delay_ms() -> u64 {
    200
}
fn default_max_retry_delay_ms() -> u64 {
    2_000
}
fn default_retry_backoff_multiplier() -> u64 {
    2
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.http_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            timeout_seconds: self.circuit_breaker_timeout_seconds,
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            send_timeout: std::time::Duration::from_millis(self.send_timeout_ms),
            delivery_stale_after: Duration::seconds(self.delivery_stale_after_seconds),
            delivery_max_checks: self.delivery_max_checks,
            delivery_sweep_batch_size: self.delivery_sweep_batch_size,
            retry_lookback: Duration::hours(self.retry_lookback_hours),
            retry_batch_size: self.retry_batch_size,
            retry_max_attempts: self.retry_max_attempts,
        }
    }

    pub fn gateway_url(&self, channel: ChannelKind) -> Option<&str> {
        match channel {
            ChannelKind::Email => self.email_gateway_url.as_deref(),
            ChannelKind::Sms => self.sms_gateway_url.as_deref(),
            ChannelKind::Chat => self.chat_gateway_url.as_deref(),
            ChannelKind::Push => None,
        }
    }

    fn has_credentials(&self, channel: ChannelKind) -> bool {
        match channel {
            ChannelKind::Push => self.fcm_project_id.is_some(),
            other => self.gateway_url(other).is_some() && self.gateway_api_key.is_some(),
        }
    }

    /// Enable flags from the environment; channels that need credentials we do not
    /// have are switched off.
    pub fn channel_catalog(&self) -> ChannelCatalog {
        ChannelCatalog::new(ChannelKind::ALL.into_iter().map(|kind| {
            let mut channel = ChannelConfig::default_for(kind);
            let flag = match kind {
                ChannelKind::Push => self.push_enabled,
                ChannelKind::Email => self.email_enabled,
                ChannelKind::Sms => self.sms_enabled,
                ChannelKind::Chat => self.chat_enabled,
            };
            channel.enabled = flag && (!channel.requires_auth || self.has_credentials(kind));
            channel
        }))
    }

    pub fn delivery_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.delivery_sweep_interval_seconds)
    }

    pub fn retry_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_sweep_interval_seconds)
    }
}
