use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info};

use crate::{
    models::channel::{ChannelKind, RateLimit},
    rate_limit::{RateLimiter, window_keys},
};

const HOUR_TTL_SECONDS: i64 = 3_600;
const DAY_TTL_SECONDS: i64 = 86_400;

pub async fn connect(redis_url: &str) -> Result<MultiplexedConnection, Error> {
    info!("Connecting to Redis");

    let client =
        Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

    let connection = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

    info!("Redis connection established");

    Ok(connection)
}

/// Shared fixed-window counters, so every replica draws from the same hourly and
/// daily budget per channel.
#[derive(Clone)]
pub struct RedisRateLimiter {
    connection: MultiplexedConnection,
}

impl RedisRateLimiter {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    async fn bump(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
        ttl_seconds: i64,
    ) -> Result<u32, Error> {
        let count: u32 = conn.incr(key, 1).await?;
        if count == 1 {
            conn.expire::<_, ()>(key, ttl_seconds).await?;
        }
        Ok(count)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn try_acquire(
        &self,
        channel: ChannelKind,
        limit: RateLimit,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let (hour, day) = window_keys(now);
        let hour_key = format!("ratelimit:{}:hour:{}", channel, hour);
        let day_key = format!("ratelimit:{}:day:{}", channel, day);

        let mut conn = self.connection.clone();
        let used_hour = self.bump(&mut conn, &hour_key, HOUR_TTL_SECONDS).await?;
        let used_day = self.bump(&mut conn, &day_key, DAY_TTL_SECONDS).await?;

        let allowed = used_hour <= limit.max_per_hour && used_day <= limit.max_per_day;
        if !allowed {
            // Denied sends must not count against the window.
            conn.decr::<_, _, ()>(&hour_key, 1).await?;
            conn.decr::<_, _, ()>(&day_key, 1).await?;
            debug!(
                channel = %channel,
                used_hour,
                used_day,
                "Rate limit reached"
            );
        }

        Ok(allowed)
    }
}
