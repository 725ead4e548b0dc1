use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    clients::{health::HealthChecker, rbmq::BatchPublisher},
    engine::NotificationEngine,
    error::NotifyError,
    models::{
        batch::{BatchJob, NewBatch},
        health::HealthStatus,
        log::LogEntry,
        request::SendRequest,
        response::ApiResponse,
        statistics::NotificationStatistics,
    },
};

pub struct AppState {
    engine: Arc<NotificationEngine>,
    health_checker: HealthChecker,
    batch_queue: Option<Arc<dyn BatchPublisher>>,
}

impl AppState {
    /// Without a batch queue, or when publishing fails, created batches run on a
    /// background task of this process.
    pub fn new(
        engine: Arc<NotificationEngine>,
        health_checker: HealthChecker,
        batch_queue: Option<Arc<dyn BatchPublisher>>,
    ) -> Self {
        Self {
            engine,
            health_checker,
            batch_queue,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/notifications", post(send_notification))
        .route("/api/v1/batches", post(create_batch))
        .route("/api/v1/statistics", get(statistics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        let status = match &self {
            NotifyError::TemplateNotFound(_)
            | NotifyError::BatchNotFound(_)
            | NotifyError::RecipientNotFound(_) => StatusCode::NOT_FOUND,
            NotifyError::MissingVariables { .. } | NotifyError::InvalidWindow => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            NotifyError::ChannelDisabled(_) => StatusCode::CONFLICT,
            NotifyError::ProviderTransient(_) | NotifyError::ProviderPermanent(_) => {
                StatusCode::BAD_GATEWAY
            }
            NotifyError::Internal(e) => {
                error!(error = %e, "Internal error while handling request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        (
            status,
            Json(ApiResponse::<()>::error(message, "Request failed".to_string())),
        )
            .into_response()
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn send_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> Result<Json<ApiResponse<LogEntry>>, NotifyError> {
    let entry = state.engine.send(request).await?;
    let message = format!("Notification {}", entry.status.as_str().to_lowercase());

    Ok(Json(ApiResponse::success(entry, message)))
}

async fn create_batch(
    State(state): State<Arc<AppState>>,
    Json(new_batch): Json<NewBatch>,
) -> Result<(StatusCode, Json<ApiResponse<BatchJob>>), NotifyError> {
    let batch = state.engine.create_batch(new_batch).await?;

    let published = match &state.batch_queue {
        Some(queue) => match queue.publish_batch(batch.id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(batch_id = %batch.id, error = %e, "Batch publish failed, running in process");
                false
            }
        },
        None => false,
    };

    if !published {
        let engine = state.engine.clone();
        let batch_id = batch.id;
        tokio::spawn(async move {
            if let Err(e) = engine.run_batch(batch_id).await {
                error!(batch_id = %batch_id, error = %e, "Background batch failed");
            }
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(batch, "Batch queued".to_string())),
    ))
}

#[derive(Debug, Deserialize)]
struct StatisticsQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

async fn statistics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<ApiResponse<NotificationStatistics>>, NotifyError> {
    let stats = state.engine.get_statistics(query.start, query.end).await?;

    Ok(Json(ApiResponse::success(
        stats,
        "Statistics retrieved".to_string(),
    )))
}
