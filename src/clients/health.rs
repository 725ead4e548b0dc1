use std::{collections::BTreeMap, sync::Arc, time::Instant};

use anyhow::Result;
use chrono::Utc;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, warn};

use crate::{
    clients::{channel::ChannelAdapters, database::PgStore, rbmq::BatchQueueClient},
    models::{
        channel::{ChannelCatalog, ChannelKind},
        circuit_breaker::CircuitState,
        health::{ComponentHealth, HealthCheckResponse, overall_status},
    },
};

struct ChannelProbe {
    kind: ChannelKind,
    enabled: bool,
    circuit: Option<String>,
}

/// Probes the backing services. Components that were never attached are left out
/// of the report.
pub struct HealthChecker {
    database: Option<Arc<PgStore>>,
    redis: Option<MultiplexedConnection>,
    queue: Option<Arc<BatchQueueClient>>,
    channels: Vec<ChannelProbe>,
}

impl HealthChecker {
    pub fn new(catalog: &ChannelCatalog, adapters: &ChannelAdapters) -> Self {
        let channels = ChannelKind::ALL
            .into_iter()
            .map(|kind| ChannelProbe {
                kind,
                enabled: catalog.is_enabled(kind) && adapters.get(kind).is_some(),
                circuit: adapters.get(kind).and_then(|sender| sender.circuit_name()),
            })
            .collect();

        Self {
            database: None,
            redis: None,
            queue: None,
            channels,
        }
    }

    pub fn with_database(mut self, database: Arc<PgStore>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_redis(mut self, connection: MultiplexedConnection) -> Self {
        self.redis = Some(connection);
        self
    }

    pub fn with_queue(mut self, queue: Arc<BatchQueueClient>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = BTreeMap::new();

        if let Some(database) = &self.database {
            checks.insert("database".to_string(), check_database(database).await.critical());
        }

        if let Some(redis) = &self.redis {
            checks.insert("cache_service".to_string(), check_redis(redis.clone()).await);
        }

        if let Some(queue) = &self.queue {
            checks.insert("message_broker".to_string(), check_queue(queue));
        }

        for probe in &self.channels {
            checks.insert(format!("channel:{}", probe.kind), self.check_channel(probe).await);
        }

        HealthCheckResponse {
            status: overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_channel(&self, probe: &ChannelProbe) -> ComponentHealth {
        if !probe.enabled {
            return ComponentHealth::disabled();
        }

        let (Some(circuit), Some(redis)) = (&probe.circuit, &self.redis) else {
            return ComponentHealth::healthy(0);
        };

        match circuit_state(redis.clone(), circuit).await {
            Ok(state) => {
                debug!(
                    channel = %probe.kind,
                    circuit_state = state.as_str(),
                    "Circuit breaker state checked"
                );
                ComponentHealth::healthy(0).with_circuit_breaker(state.as_str().to_string())
            }
            Err(e) => {
                warn!(channel = %probe.kind, error = %e, "Failed to check circuit breaker state");
                ComponentHealth::unhealthy(format!("Cannot check circuit breaker: {}", e))
            }
        }
    }
}

async fn check_database(database: &PgStore) -> ComponentHealth {
    let start = Instant::now();

    match database.health_check().await {
        Ok(()) => {
            let elapsed = start.elapsed().as_millis() as u64;
            debug!(response_time_ms = elapsed, "Database health check passed");
            ComponentHealth::healthy(elapsed)
        }
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            ComponentHealth::unhealthy(format!("Health check query failed: {}", e))
        }
    }
}

async fn check_redis(mut connection: MultiplexedConnection) -> ComponentHealth {
    let start = Instant::now();

    match connection.ping::<String>().await {
        Ok(_) => {
            let elapsed = start.elapsed().as_millis() as u64;
            debug!(response_time_ms = elapsed, "Redis health check passed");
            ComponentHealth::healthy(elapsed)
        }
        Err(e) => {
            warn!(error = %e, "Redis ping failed");
            ComponentHealth::unhealthy(format!("Ping failed: {}", e))
        }
    }
}

fn check_queue(queue: &BatchQueueClient) -> ComponentHealth {
    if queue.is_connected() {
        ComponentHealth::healthy(0)
    } else {
        warn!("RabbitMQ channel is not connected");
        ComponentHealth::unhealthy("Channel not connected".to_string())
    }
}

async fn circuit_state(mut connection: MultiplexedConnection, service_name: &str) -> Result<CircuitState> {
    let key = format!("circuit:{}:state", service_name);
    let value: Option<String> = connection.get(&key).await?;

    Ok(value
        .map(|s| CircuitState::parse(&s))
        .unwrap_or(CircuitState::Closed))
}
