use std::{collections::HashMap, time::Duration};

use notification_engine::{
    engine::EngineSettings,
    error::{NotifyError, ProviderError},
    models::{
        channel::{ChannelCatalog, ChannelConfig, ChannelKind, RateLimit},
        log::LogMetadata,
        request::SendRequest,
        status::DeliveryStatus,
        template::{Priority, TemplateKey},
    },
};
use serde_json::json;
use uuid::Uuid;

use crate::common::{Harness, start_time};

fn quote_variables() -> HashMap<String, serde_json::Value> {
    [
        ("amount".to_string(), json!("150")),
        ("professionalName".to_string(), json!("Mario Rossi")),
    ]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn quote_received_goes_out_with_template_defaults() {
    let harness = Harness::new();
    let client = harness.add_recipient("CLIENT");

    let entry = harness
        .engine
        .send(SendRequest::template(
            client.id,
            ChannelKind::Push,
            TemplateKey::QuoteReceived,
            quote_variables(),
        ))
        .await
        .unwrap();

    assert_eq!(entry.status, DeliveryStatus::Sent);
    assert_eq!(entry.priority, Priority::High);
    assert_eq!(entry.body, "Hai ricevuto un preventivo di €150 da Mario Rossi");
    assert_eq!(entry.subject.as_deref(), Some("Nuovo preventivo: €150"));
    assert_eq!(entry.template_key, Some(TemplateKey::QuoteReceived));
    assert_eq!(entry.sent_at, Some(start_time()));
    assert!(entry.metadata.provider_message_id.is_some());

    let sent = harness.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(Some(sent[0].address.as_str()), client.push_token.as_deref());

    let stored = harness.store.logs();
    assert_eq!(stored, vec![entry]);
}

#[tokio::test]
async fn urgent_chat_message_is_stripped_and_bannered() {
    let harness = Harness::new();
    let client = harness.add_recipient("CLIENT");

    let entry = harness
        .engine
        .send(
            SendRequest::custom(client.id, ChannelKind::Chat, None, "<p>Hello</p><br>World")
                .with_priority(Priority::Urgent),
        )
        .await
        .unwrap();

    assert_eq!(entry.body, "🚨 *URGENT* 🚨\n\nHello\n\nWorld");
    assert_eq!(harness.sender.sent()[0].body, entry.body);
}

#[tokio::test]
async fn explicit_priority_overrides_template_default() {
    let harness = Harness::new();
    let client = harness.add_recipient("CLIENT");

    let entry = harness
        .engine
        .send(
            SendRequest::template(
                client.id,
                ChannelKind::Sms,
                TemplateKey::QuoteReceived,
                quote_variables(),
            )
            .with_priority(Priority::Low),
        )
        .await
        .unwrap();

    assert_eq!(entry.priority, Priority::Low);
    assert!(entry.body.starts_with("💬 "));
}

#[tokio::test]
async fn caller_errors_persist_nothing() {
    let mut catalog_configs: Vec<ChannelConfig> = ChannelKind::ALL
        .into_iter()
        .map(ChannelConfig::default_for)
        .collect();
    catalog_configs.retain(|c| c.kind != ChannelKind::Sms);
    let harness = Harness::with_catalog(ChannelCatalog::new(catalog_configs));
    let client = harness.add_recipient("CLIENT");

    let missing = harness
        .engine
        .send(SendRequest::template(
            client.id,
            ChannelKind::Email,
            TemplateKey::QuoteReceived,
            HashMap::new(),
        ))
        .await;
    match missing {
        Err(NotifyError::MissingVariables { missing, .. }) => {
            assert_eq!(missing, vec!["amount", "professionalName"])
        }
        other => panic!("unexpected: {:?}", other),
    }

    let disabled = harness
        .engine
        .send(SendRequest::custom(client.id, ChannelKind::Sms, None, "hi"))
        .await;
    assert!(matches!(disabled, Err(NotifyError::ChannelDisabled(ChannelKind::Sms))));

    let stranger = Uuid::new_v4();
    let unknown = harness
        .engine
        .send(SendRequest::custom(stranger, ChannelKind::Email, None, "hi"))
        .await;
    assert!(matches!(unknown, Err(NotifyError::RecipientNotFound(id)) if id == stranger));

    assert!(harness.store.logs().is_empty());
    assert!(harness.sender.sent().is_empty());
}

#[tokio::test]
async fn inactive_recipients_are_not_found() {
    let harness = Harness::new();
    let mut former = crate::common::recipient("CLIENT");
    former.active = false;
    harness.store.add_recipient(former.clone());

    let result = harness
        .engine
        .send(SendRequest::custom(former.id, ChannelKind::Email, None, "hi"))
        .await;

    assert!(matches!(result, Err(NotifyError::RecipientNotFound(_))));
}

#[tokio::test]
async fn provider_failures_are_recorded_with_their_class() {
    let harness = Harness::new();
    let bad = harness.add_recipient("CLIENT");
    let flaky = harness.add_recipient("CLIENT");
    harness.sender.fail_address(
        bad.email.as_deref().unwrap(),
        ProviderError::Permanent("mailbox does not exist".to_string()),
    );
    harness.sender.fail_address(
        flaky.email.as_deref().unwrap(),
        ProviderError::Transient("connection reset".to_string()),
    );

    let permanent = harness
        .engine
        .send(SendRequest::custom(bad.id, ChannelKind::Email, None, "hi"))
        .await
        .unwrap();
    let transient = harness
        .engine
        .send(SendRequest::custom(flaky.id, ChannelKind::Email, None, "hi"))
        .await
        .unwrap();

    assert_eq!(permanent.status, DeliveryStatus::Failed);
    assert!(permanent.metadata.permanent_failure);
    assert_eq!(transient.status, DeliveryStatus::Failed);
    assert!(!transient.metadata.permanent_failure);
    assert!(
        transient
            .metadata
            .last_error
            .as_deref()
            .unwrap()
            .contains("connection reset")
    );

    assert_eq!(harness.store.logs().len(), 2);
}

#[tokio::test]
async fn missing_address_is_a_permanent_failure() {
    let harness = Harness::new();
    let mut client = crate::common::recipient("CLIENT");
    client.phone = None;
    harness.store.add_recipient(client.clone());

    let entry = harness
        .engine
        .send(SendRequest::custom(client.id, ChannelKind::Sms, None, "hi"))
        .await
        .unwrap();

    assert_eq!(entry.status, DeliveryStatus::Failed);
    assert!(entry.metadata.permanent_failure);
    assert!(harness.sender.sent().is_empty());
}

#[tokio::test]
async fn slow_provider_times_out_as_transient() {
    let harness = Harness::with_settings(EngineSettings {
        send_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    let client = harness.add_recipient("CLIENT");
    harness.sender.hang();

    let entry = harness
        .engine
        .send(SendRequest::custom(client.id, ChannelKind::Email, None, "hi"))
        .await
        .unwrap();

    assert_eq!(entry.status, DeliveryStatus::Failed);
    assert!(!entry.metadata.permanent_failure);
    assert!(entry.metadata.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn rate_limited_sends_fail_transiently() {
    let mut sms = ChannelConfig::default_for(ChannelKind::Sms);
    sms.rate_limit = Some(RateLimit {
        max_per_hour: 1,
        max_per_day: 10,
    });
    let harness = Harness::with_catalog(ChannelCatalog::new([sms]));
    let client = harness.add_recipient("CLIENT");

    let first = harness
        .engine
        .send(SendRequest::custom(client.id, ChannelKind::Sms, None, "one"))
        .await
        .unwrap();
    let second = harness
        .engine
        .send(SendRequest::custom(client.id, ChannelKind::Sms, None, "two"))
        .await
        .unwrap();

    assert_eq!(first.status, DeliveryStatus::Sent);
    assert_eq!(second.status, DeliveryStatus::Failed);
    assert!(!second.metadata.permanent_failure);
    assert!(second.metadata.last_error.unwrap().contains("rate limit"));
}

#[tokio::test]
async fn caller_metadata_is_kept_on_the_entry() {
    let harness = Harness::new();
    let client = harness.add_recipient("CLIENT");

    let entry = harness
        .engine
        .send(
            SendRequest::custom(client.id, ChannelKind::Email, Some("Hi".to_string()), "hello")
                .with_metadata(LogMetadata::default().with_extra("campaign", json!("autumn"))),
        )
        .await
        .unwrap();

    assert_eq!(entry.metadata.extra.get("campaign"), Some(&json!("autumn")));
    assert_eq!(entry.metadata.retry_attempt, 0);
}

#[tokio::test]
async fn caller_cannot_preset_retry_bookkeeping() {
    let harness = Harness::new();
    let client = harness.add_recipient("CLIENT");
    harness.sender.fail_address(
        client.email.as_deref().unwrap(),
        ProviderError::Transient("connection reset".to_string()),
    );

    let forged = LogMetadata {
        retry_attempt: 99,
        retried_at: Some(start_time()),
        permanent_failure: true,
        confirmation_checks: 11,
        provider_message_id: Some("forged-id".to_string()),
        ..Default::default()
    }
    .with_extra("campaign", json!("autumn"));

    let entry = harness
        .engine
        .send(SendRequest::custom(client.id, ChannelKind::Email, None, "hello").with_metadata(forged))
        .await
        .unwrap();

    assert_eq!(entry.status, DeliveryStatus::Failed);
    assert_eq!(entry.metadata.retry_attempt, 0);
    assert_eq!(entry.metadata.retried_at, None);
    assert_eq!(entry.metadata.confirmation_checks, 0);
    assert!(!entry.metadata.permanent_failure);
    assert_eq!(entry.metadata.provider_message_id, None);
    assert_eq!(entry.metadata.extra.get("campaign"), Some(&json!("autumn")));

    let report = harness.engine.retry_recent().await.unwrap();
    assert_eq!(report.examined, 1);
}
