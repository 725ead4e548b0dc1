use std::time::Duration;

use notification_engine::{
    clients::{
        channel::{ChannelSender, OutboundMessage},
        gateway::GatewayChannelClient,
    },
    error::ProviderError,
    models::{channel::ChannelKind, retry::RetryConfig, template::Priority},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

fn fast_retries() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2,
    }
}

fn client_for(server: &MockServer, channel: ChannelKind) -> GatewayChannelClient {
    GatewayChannelClient::new(
        channel,
        &server.uri(),
        Some("gateway-key".to_string()),
        Duration::from_secs(2),
        fast_retries(),
    )
    .unwrap()
}

fn outbound<'a>(body: &'a str) -> OutboundMessage<'a> {
    OutboundMessage {
        address: "+393331234567",
        subject: None,
        body,
        priority: Priority::High,
    }
}

#[tokio::test]
async fn send_posts_the_message_and_returns_the_provider_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("authorization", "Bearer gateway-key"))
        .and(body_json(json!({
            "channel": "sms",
            "to": "+393331234567",
            "body": "📢 Il tuo appuntamento è domani",
            "priority": "high",
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"id": "sms-981"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ChannelKind::Sms);
    let id = client.send(outbound("📢 Il tuo appuntamento è domani")).await.unwrap();

    assert_eq!(id, "sms-981");
}

#[tokio::test]
async fn rejected_message_is_a_permanent_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid phone number"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ChannelKind::Sms);
    let result = client.send(outbound("ciao")).await;

    match result {
        Err(ProviderError::Permanent(detail)) => assert!(detail.contains("invalid phone number")),
        other => panic!("expected permanent error, got {:?}", other),
    }
}

#[tokio::test]
async fn throttled_send_is_transient_and_not_retried_by_the_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ChannelKind::Email);
    let result = client.send(outbound("ciao")).await;

    assert!(matches!(result, Err(ProviderError::Transient(_))));
}

#[tokio::test]
async fn delivery_check_retries_through_a_temporary_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/chat-12"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/messages/chat-12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "READ"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ChannelKind::Chat);

    assert_eq!(client.check_delivered("chat-12").await, Ok(true));
}

#[tokio::test]
async fn queued_message_is_not_yet_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/mail-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "queued"})))
        .mount(&server)
        .await;

    let client = client_for(&server, ChannelKind::Email);

    assert_eq!(client.check_delivered("mail-3").await, Ok(false));
}

#[tokio::test]
async fn unknown_message_id_stops_the_delivery_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ChannelKind::Email);
    let result = client.check_delivered("missing").await;

    assert!(matches!(result, Err(ProviderError::Permanent(_))));
}
