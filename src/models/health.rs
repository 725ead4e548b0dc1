use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,

    /// Outages here stop the engine from doing any work at all.
    #[serde(skip)]
    pub critical: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            critical: false,
            response_time_ms: Some(response_time_ms),
            circuit_breaker: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            critical: false,
            response_time_ms: None,
            circuit_breaker: None,
            error: Some(error),
        }
    }

    pub fn disabled() -> Self {
        Self {
            status: HealthStatus::Degraded,
            critical: false,
            response_time_ms: None,
            circuit_breaker: None,
            error: Some("Channel disabled by configuration".to_string()),
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_circuit_breaker(mut self, state: String) -> Self {
        if state != "closed" {
            self.status = HealthStatus::Degraded;
        }
        self.circuit_breaker = Some(state);
        self
    }
}

pub fn overall_status(checks: &BTreeMap<String, ComponentHealth>) -> HealthStatus {
    let critical_unhealthy = checks
        .values()
        .any(|health| health.critical && health.status == HealthStatus::Unhealthy);

    let any_problem = checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy);

    if critical_unhealthy {
        HealthStatus::Unhealthy
    } else if any_problem {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
