use anyhow::{Error, Result};
use chrono::Utc;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::{
    error::ProviderError,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
};

/// Redis-backed breaker shared by every replica talking to the same provider.
#[derive(Clone)]
pub struct CircuitBreaker {
    service_name: String,
    connection: MultiplexedConnection,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(
        service_name: String,
        connection: MultiplexedConnection,
        config: CircuitBreakerConfig,
    ) -> Self {
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            connection,
            config,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Runs `operation` unless the circuit is open. Permanent provider errors do not
    /// count against the provider's health.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut conn = self.connection.clone();
        let state = self.get_state(&mut conn).await.unwrap_or_else(|e| {
            warn!(service = %self.service_name, error = %e, "Circuit state unavailable, assuming closed");
            CircuitState::Closed
        });

        match state {
            CircuitState::Open => {
                if self.should_attempt_reset(&mut conn).await.unwrap_or(false) {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.log_bookkeeping(self.set_state(&mut conn, CircuitState::HalfOpen).await);
                    return self.try_operation(&mut conn, operation).await;
                }
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(ProviderError::Transient(format!(
                    "circuit breaker is open for {}",
                    self.service_name
                )))
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                self.try_operation(&mut conn, operation).await
            }
            CircuitState::Closed => self.try_operation(&mut conn, operation).await,
        }
    }

    async fn try_operation<F, Fut, T>(
        &self,
        conn: &mut MultiplexedConnection,
        operation: F,
    ) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        match operation().await {
            Ok(result) => {
                let recorded = self.record_success(conn).await;
                self.log_bookkeeping(recorded);
                Ok(result)
            }
            Err(e @ ProviderError::Permanent(_)) => Err(e),
            Err(e) => {
                let recorded = self.record_failure(conn).await;
                self.log_bookkeeping(recorded);
                Err(e)
            }
        }
    }

    fn log_bookkeeping(&self, result: Result<(), Error>) {
        if let Err(e) = result {
            warn!(service = %self.service_name, error = %e, "Failed to update circuit breaker");
        }
    }

    async fn record_success(&self, conn: &mut MultiplexedConnection) -> Result<(), Error> {
        let state = self.get_state(conn).await?;

        if state == CircuitState::HalfOpen {
            let successes = self.increment_success_count(conn).await?;
            debug!(
                service = %self.service_name,
                successes,
                threshold = self.config.success_threshold,
                "Circuit breaker success recorded"
            );

            if successes >= self.config.success_threshold {
                self.set_state(conn, CircuitState::Closed).await?;
                self.reset_counters(conn).await?;
                info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
            }
        } else if state == CircuitState::Closed {
            conn.del::<_, ()>(self.key("failures")).await?;
        }

        Ok(())
    }

    async fn record_failure(&self, conn: &mut MultiplexedConnection) -> Result<(), Error> {
        let state = self.get_state(conn).await?;

        if state == CircuitState::HalfOpen {
            self.set_state(conn, CircuitState::Open).await?;
            self.set_opened_at(conn).await?;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let key = self.key("failures");
        let failures: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, self.config.timeout_seconds as i64)
            .await?;

        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold {
            self.set_state(conn, CircuitState::Open).await?;
            self.set_opened_at(conn).await?;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        Ok(())
    }

    fn key(&self, suffix: &str) -> String {
        format!("circuit:{}:{}", self.service_name, suffix)
    }

    async fn get_state(&self, conn: &mut MultiplexedConnection) -> Result<CircuitState, Error> {
        let value: Option<String> = conn.get(self.key("state")).await?;

        Ok(value
            .map(|s| CircuitState::parse(&s))
            .unwrap_or(CircuitState::Closed))
    }

    async fn set_state(
        &self,
        conn: &mut MultiplexedConnection,
        state: CircuitState,
    ) -> Result<(), Error> {
        conn.set::<_, _, ()>(self.key("state"), state.as_str())
            .await?;
        Ok(())
    }

    async fn increment_success_count(&self, conn: &mut MultiplexedConnection) -> Result<u32, Error> {
        let count: u32 = conn.incr(self.key("successes"), 1).await?;
        Ok(count)
    }

    async fn reset_counters(&self, conn: &mut MultiplexedConnection) -> Result<(), Error> {
        conn.del::<_, ()>(vec![
            self.key("failures"),
            self.key("successes"),
            self.key("opened_at"),
        ])
        .await?;

        Ok(())
    }

    async fn set_opened_at(&self, conn: &mut MultiplexedConnection) -> Result<(), Error> {
        conn.set::<_, _, ()>(self.key("opened_at"), Utc::now().timestamp())
            .await?;
        Ok(())
    }

    async fn should_attempt_reset(&self, conn: &mut MultiplexedConnection) -> Result<bool, Error> {
        let opened_at: Option<i64> = conn.get(self.key("opened_at")).await?;

        Ok(opened_at.is_some_and(|opened_at| {
            let elapsed = Utc::now().timestamp() - opened_at;
            elapsed >= self.config.timeout_seconds as i64
        }))
    }
}
