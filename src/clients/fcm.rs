use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    clients::{
        channel::{ChannelSender, OutboundMessage},
        circuit_breaker::CircuitBreaker,
        gateway::classify_status,
    },
    error::ProviderError,
    models::template::Priority,
};

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const FCM_BASE_URL: &str = "https://fcm.googleapis.com";

#[derive(Debug, Clone, Serialize)]
struct FcmRequest {
    message: FcmMessage,
}

#[derive(Debug, Clone, Serialize)]
struct FcmMessage {
    token: String,
    notification: FcmNotification,
    android: FcmAndroidConfig,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    data: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
struct FcmNotification {
    title: String,
    body: String,
}

#[derive(Debug, Clone, Serialize)]
struct FcmAndroidConfig {
    priority: &'static str,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    name: String,
}

pub fn validate_push_token(token: &str) -> Result<(), ProviderError> {
    if token.len() < 20 {
        return Err(ProviderError::Permanent(
            "device token too short (minimum 20 characters)".to_string(),
        ));
    }

    if token.len() > 200 {
        return Err(ProviderError::Permanent(
            "device token too long (maximum 200 characters)".to_string(),
        ));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.');

    if !valid_chars {
        return Err(ProviderError::Permanent(
            "device token contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

/// Push adapter on top of the FCM HTTP v1 API.
pub struct FcmClient {
    http_client: Client,
    fcm_project_id: String,
    base_url: String,
    circuit_breaker: Option<CircuitBreaker>,
}

impl FcmClient {
    pub fn new(fcm_project_id: String, timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Permanent(format!("http client setup failed: {}", e)))?;

        info!(project_id = %fcm_project_id, "FCM client initialized");

        Ok(Self {
            http_client,
            fcm_project_id,
            base_url: FCM_BASE_URL.to_string(),
            circuit_breaker: None,
        })
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    async fn send_once(&self, request: &FcmRequest) -> Result<String, ProviderError> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| ProviderError::Transient(format!("gcp auth unavailable: {}", e)))?;

        let token = provider
            .token(&[FCM_SCOPE])
            .await
            .map_err(|e| ProviderError::Transient(format!("gcp token fetch failed: {}", e)))?;

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.fcm_project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("FCM unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let accepted: FcmResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("unreadable FCM response: {}", e)))?;

        Ok(accepted.name)
    }
}

#[async_trait]
impl ChannelSender for FcmClient {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<String, ProviderError> {
        validate_push_token(message.address)?;

        let android_priority = match message.priority {
            Priority::High | Priority::Urgent | Priority::Critical => "high",
            Priority::Low | Priority::Normal => "normal",
        };

        let request = FcmRequest {
            message: FcmMessage {
                token: message.address.to_string(),
                notification: FcmNotification {
                    title: message.subject.unwrap_or_default().to_string(),
                    body: message.body.to_string(),
                },
                android: FcmAndroidConfig {
                    priority: android_priority,
                },
                data: HashMap::from([("priority".to_string(), message.priority.to_string())]),
            },
        };

        debug!(priority = %message.priority, "Sending FCM push notification");

        let name = match &self.circuit_breaker {
            Some(breaker) => breaker.call(|| self.send_once(&request)).await?,
            None => self.send_once(&request).await?,
        };

        info!(provider_message_id = %name, "FCM push notification sent successfully");
        Ok(name)
    }

    /// FCM exposes no delivery receipts; acceptance is the strongest signal available.
    async fn check_delivered(&self, _provider_message_id: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }

    fn circuit_name(&self) -> Option<String> {
        self.circuit_breaker
            .as_ref()
            .map(|breaker| breaker.service_name().to_string())
    }
}
