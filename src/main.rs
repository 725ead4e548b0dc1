use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use notification_engine::{
    api::{AppState, run_api_server},
    clients::{
        channel::ChannelAdapters,
        circuit_breaker::CircuitBreaker,
        database::PgStore,
        fcm::FcmClient,
        gateway::GatewayChannelClient,
        health::HealthChecker,
        rbmq::{BatchPublisher, BatchQueueClient},
        redis::{self as redis_client, RedisRateLimiter},
    },
    clock::SystemClock,
    config::Config,
    engine::{EnginePorts, NotificationEngine, scheduler::spawn_sweeps},
    models::channel::ChannelKind,
    worker::run_batch_consumer,
};
use redis::aio::MultiplexedConnection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let config = Config::load()?;
    info!("Configuration validated");

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.migrate().await?;

    let redis = redis_client::connect(&config.redis_url).await?;
    let queue = Arc::new(BatchQueueClient::connect(&config).await?);

    let channels = config.channel_catalog();
    let adapters = build_adapters(&config, &redis)?;

    let ports = EnginePorts {
        logs: store.clone(),
        batches: store.clone(),
        recipients: store.clone(),
        audit: store.clone(),
        rate_limiter: Arc::new(RedisRateLimiter::new(redis.clone())),
        clock: Arc::new(SystemClock),
    };
    let engine = Arc::new(NotificationEngine::new(
        ports,
        channels.clone(),
        adapters.clone(),
        config.engine_settings(),
    ));

    let health_checker = HealthChecker::new(&channels, &adapters)
        .with_database(store.clone())
        .with_redis(redis.clone())
        .with_queue(queue.clone());

    let shutdown = CancellationToken::new();

    let sweeps = spawn_sweeps(
        engine.clone(),
        config.delivery_sweep_interval(),
        config.retry_sweep_interval(),
        shutdown.clone(),
    );
    let worker = tokio::spawn(run_batch_consumer(
        engine.clone(),
        queue.clone(),
        shutdown.clone(),
    ));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal_token.cancel();
        }
    });

    let publisher: Arc<dyn BatchPublisher> = queue;
    let state = Arc::new(AppState::new(engine, health_checker, Some(publisher)));
    let served = run_api_server(state, config.server_port, shutdown.clone()).await;
    shutdown.cancel();

    for sweep in sweeps {
        if let Err(e) = sweep.await {
            error!(error = %e, "Sweep task panicked");
        }
    }

    match worker.await {
        Ok(Err(e)) => error!(error = %e, "Batch worker exited with error"),
        Err(e) => error!(error = %e, "Batch worker panicked"),
        Ok(Ok(())) => {}
    }

    served
}

fn build_adapters(config: &Config, redis: &MultiplexedConnection) -> Result<ChannelAdapters, Error> {
    let timeout = Duration::from_millis(config.send_timeout_ms);
    let mut adapters = ChannelAdapters::new();

    for channel in [ChannelKind::Email, ChannelKind::Sms, ChannelKind::Chat] {
        let Some(base_url) = config.gateway_url(channel) else {
            continue;
        };

        let breaker = CircuitBreaker::new(
            format!("gateway_{}", channel),
            redis.clone(),
            config.circuit_breaker_config(),
        );
        let client = GatewayChannelClient::new(
            channel,
            base_url,
            config.gateway_api_key.clone(),
            timeout,
            config.retry_config(),
        )?
        .with_circuit_breaker(breaker);

        adapters = adapters.with(channel, Arc::new(client));
    }

    if let Some(project_id) = &config.fcm_project_id {
        let breaker = CircuitBreaker::new(
            "fcm".to_string(),
            redis.clone(),
            config.circuit_breaker_config(),
        );
        let client = FcmClient::new(project_id.clone(), timeout)?.with_circuit_breaker(breaker);

        adapters = adapters.with(ChannelKind::Push, Arc::new(client));
    }

    Ok(adapters)
}
