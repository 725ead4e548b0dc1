use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::channel::{ChannelKind, RateLimit};

/// Fixed-window hour and day buckets, e.g. `2026101714` and `20261017`.
pub fn window_keys(now: DateTime<Utc>) -> (String, String) {
    (
        now.format("%Y%m%d%H").to_string(),
        now.format("%Y%m%d").to_string(),
    )
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Takes one slot from both windows; false means the channel is over its limit.
    async fn try_acquire(
        &self,
        channel: ChannelKind,
        limit: RateLimit,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryRateLimiter {
    counters: Mutex<HashMap<(ChannelKind, String), u32>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn try_acquire(
        &self,
        channel: ChannelKind,
        limit: RateLimit,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let (hour_key, day_key) = window_keys(now);
        let hour_key = (channel, format!("hour:{}", hour_key));
        let day_key = (channel, format!("day:{}", day_key));

        let mut counters = self.counters.lock();
        // only the current hour and day buckets can still deny a send
        counters.retain(|key, _| key == &hour_key || key == &day_key || key.0 != channel);
        let used_hour = counters.get(&hour_key).copied().unwrap_or(0);
        let used_day = counters.get(&day_key).copied().unwrap_or(0);

        if used_hour >= limit.max_per_hour || used_day >= limit.max_per_day {
            return Ok(false);
        }

        counters.insert(hour_key, used_hour + 1);
        counters.insert(day_key, used_day + 1);
        Ok(true)
    }
}
