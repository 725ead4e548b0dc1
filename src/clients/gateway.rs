use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    clients::{
        channel::{ChannelSender, OutboundMessage},
        circuit_breaker::CircuitBreaker,
    },
    error::ProviderError,
    models::{channel::ChannelKind, retry::RetryConfig, template::Priority},
    utils::{is_transient, retry_with_backoff_if},
};

#[derive(Debug, Serialize)]
struct GatewayMessage<'a> {
    channel: ChannelKind,
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    body: &'a str,
    priority: Priority,
}

#[derive(Debug, Deserialize)]
struct Accepted {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageState {
    status: String,
}

/// JSON-over-HTTP adapter used for the email, SMS and chat providers.
#[derive(Clone)]
pub struct GatewayChannelClient {
    http_client: Client,
    channel: ChannelKind,
    base_url: String,
    api_key: Option<String>,
    retry_config: RetryConfig,
    circuit_breaker: Option<CircuitBreaker>,
}

impl GatewayChannelClient {
    pub fn new(
        channel: ChannelKind,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        retry_config: RetryConfig,
    ) -> Result<Self, ProviderError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Permanent(format!("http client setup failed: {}", e)))?;

        info!(channel = %channel, base_url, "Gateway channel client initialized");

        Ok(Self {
            http_client,
            channel,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry_config,
            circuit_breaker: None,
        })
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post_message(&self, message: &OutboundMessage<'_>) -> Result<String, ProviderError> {
        let payload = GatewayMessage {
            channel: self.channel,
            to: message.address,
            subject: message.subject,
            body: message.body,
            priority: message.priority,
        };

        let response = self
            .authorized(self.http_client.post(format!("{}/messages", self.base_url)))
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let accepted: Accepted = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("unreadable gateway response: {}", e)))?;

        Ok(accepted.id)
    }

    async fn fetch_state(&self, provider_message_id: &str) -> Result<bool, ProviderError> {
        let response = self
            .authorized(
                self.http_client
                    .get(format!("{}/messages/{}", self.base_url, provider_message_id)),
            )
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let state: MessageState = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("unreadable gateway response: {}", e)))?;

        Ok(matches!(
            state.status.to_ascii_lowercase().as_str(),
            "delivered" | "read"
        ))
    }
}

#[async_trait]
impl ChannelSender for GatewayChannelClient {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<String, ProviderError> {
        debug!(channel = %self.channel, priority = %message.priority, "Sending through gateway");

        let result = match &self.circuit_breaker {
            Some(breaker) => breaker.call(|| self.post_message(&message)).await,
            None => self.post_message(&message).await,
        };

        match &result {
            Ok(id) => info!(channel = %self.channel, provider_message_id = %id, "Gateway accepted message"),
            Err(e) => warn!(channel = %self.channel, error = %e, "Gateway send failed"),
        }

        result
    }

    async fn check_delivered(&self, provider_message_id: &str) -> Result<bool, ProviderError> {
        retry_with_backoff_if(&self.retry_config, is_transient, || {
            self.fetch_state(provider_message_id)
        })
        .await
    }

    fn circuit_name(&self) -> Option<String> {
        self.circuit_breaker
            .as_ref()
            .map(|breaker| breaker.service_name().to_string())
    }
}

fn request_error(err: reqwest::Error) -> ProviderError {
    if err.is_builder() {
        ProviderError::Permanent(format!("invalid gateway request: {}", err))
    } else {
        ProviderError::Transient(format!("gateway unreachable: {}", err))
    }
}

/// 4xx means the provider refused this message, except for timeouts and throttling.
pub fn classify_status(status: StatusCode, detail: &str) -> ProviderError {
    let message = format!("gateway returned {}: {}", status, detail);

    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        ProviderError::Permanent(message)
    } else {
        ProviderError::Transient(message)
    }
}
