use std::collections::HashMap;

use notification_engine::{
    error::NotifyError,
    models::{
        audit::BATCH_SENT_ACTION,
        batch::{NewBatch, TargetType},
        channel::{ChannelCatalog, ChannelConfig, ChannelKind},
        status::{BatchStatus, DeliveryStatus},
        template::{Priority, TemplateKey},
    },
    store::BatchStore,
};
use serde_json::json;
use uuid::Uuid;

use crate::common::{Harness, recipient};

fn announcement(target_type: TargetType, channels: Vec<ChannelKind>) -> NewBatch {
    NewBatch {
        template_key: TemplateKey::SystemAnnouncement,
        target_type,
        target_role: None,
        target_ids: Vec::new(),
        channels,
        variables: [
            ("title".to_string(), json!("Manutenzione")),
            ("message".to_string(), json!("Il servizio sarà offline stanotte")),
        ]
        .into_iter()
        .collect(),
        priority: None,
        created_by: Uuid::new_v4(),
    }
}

fn add_without_phone(harness: &Harness) {
    let mut client = recipient("CLIENT");
    client.phone = None;
    harness.store.add_recipient(client);
}

#[tokio::test]
async fn counts_recipients_with_and_without_a_reachable_channel() {
    let harness = Harness::new();
    for _ in 0..3 {
        harness.add_recipient("CLIENT");
    }
    for _ in 0..2 {
        add_without_phone(&harness);
    }

    let batch = harness
        .engine
        .create_batch(announcement(TargetType::AllUsers, vec![ChannelKind::Sms]))
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Pending);

    let finished = harness.engine.run_batch(batch.id).await.unwrap();

    assert_eq!(finished.status, BatchStatus::Sent);
    assert_eq!(finished.total_recipients, 5);
    assert_eq!(finished.sent_count, 3);
    assert_eq!(finished.failed_count, 2);

    let stored = BatchStore::find_by_id(&*harness.store, batch.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, BatchStatus::Sent);
    assert_eq!(stored.sent_count, 3);

    let logs = harness.store.logs();
    assert_eq!(logs.len(), 5);
    assert!(logs.iter().all(|entry| entry.metadata.batch_id == Some(batch.id)));
    assert_eq!(harness.sender.sent().len(), 3);
}

#[tokio::test]
async fn batch_fails_only_when_every_recipient_fails() {
    let harness = Harness::new();
    for _ in 0..2 {
        add_without_phone(&harness);
    }

    let batch = harness
        .engine
        .create_batch(announcement(TargetType::AllUsers, vec![ChannelKind::Sms]))
        .await
        .unwrap();
    let finished = harness.engine.run_batch(batch.id).await.unwrap();

    assert_eq!(finished.status, BatchStatus::Failed);
    assert_eq!(finished.sent_count, 0);
    assert_eq!(finished.failed_count, 2);
}

#[tokio::test]
async fn one_successful_channel_counts_the_recipient_as_sent() {
    let harness = Harness::new();
    add_without_phone(&harness);

    let batch = harness
        .engine
        .create_batch(announcement(
            TargetType::AllUsers,
            vec![ChannelKind::Sms, ChannelKind::Email],
        ))
        .await
        .unwrap();
    let finished = harness.engine.run_batch(batch.id).await.unwrap();

    assert_eq!(finished.sent_count, 1);
    assert_eq!(finished.failed_count, 0);

    let mut statuses: Vec<DeliveryStatus> =
        harness.store.logs().iter().map(|entry| entry.status).collect();
    statuses.sort();
    assert_eq!(statuses, vec![DeliveryStatus::Sent, DeliveryStatus::Failed]);
}

#[tokio::test]
async fn role_targeting_skips_other_roles_and_inactive_users() {
    let harness = Harness::new();
    let pro = harness.add_recipient("PROFESSIONAL");
    harness.add_recipient("CLIENT");
    let mut retired = recipient("PROFESSIONAL");
    retired.active = false;
    harness.store.add_recipient(retired);

    let mut new_batch = announcement(TargetType::Role, vec![ChannelKind::Email]);
    new_batch.target_role = Some("PROFESSIONAL".to_string());
    let batch = harness.engine.create_batch(new_batch).await.unwrap();
    let finished = harness.engine.run_batch(batch.id).await.unwrap();

    assert_eq!(finished.total_recipients, 1);
    let logs = harness.store.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].recipient_id, pro.id);
}

#[tokio::test]
async fn custom_targeting_sends_only_to_listed_ids() {
    let harness = Harness::new();
    let first = harness.add_recipient("CLIENT");
    let second = harness.add_recipient("CLIENT");
    harness.add_recipient("CLIENT");

    let mut new_batch = announcement(TargetType::Custom, vec![ChannelKind::Email]);
    new_batch.target_ids = vec![first.id, second.id, Uuid::new_v4()];
    let batch = harness.engine.create_batch(new_batch).await.unwrap();
    let finished = harness.engine.run_batch(batch.id).await.unwrap();

    assert_eq!(finished.total_recipients, 2);
    assert_eq!(harness.store.logs_for(first.id).len(), 1);
    assert_eq!(harness.store.logs_for(second.id).len(), 1);
}

#[tokio::test]
async fn empty_channel_list_uses_template_defaults_and_batch_priority() {
    let harness = Harness::new();
    let client = harness.add_recipient("CLIENT");

    let mut new_batch = NewBatch {
        template_key: TemplateKey::QuoteReceived,
        variables: [
            ("amount".to_string(), json!(80)),
            ("professionalName".to_string(), json!("Luca Bianchi")),
        ]
        .into_iter()
        .collect(),
        ..announcement(TargetType::AllUsers, Vec::new())
    };
    new_batch.priority = Some(Priority::Urgent);
    let batch = harness.engine.create_batch(new_batch).await.unwrap();
    harness.engine.run_batch(batch.id).await.unwrap();

    let mut channels: Vec<ChannelKind> = harness
        .store
        .logs_for(client.id)
        .iter()
        .map(|entry| entry.channel)
        .collect();
    channels.sort();
    assert_eq!(channels, vec![ChannelKind::Push, ChannelKind::Email]);
    assert!(
        harness
            .store
            .logs()
            .iter()
            .all(|entry| entry.priority == Priority::Urgent)
    );
}

#[tokio::test]
async fn disabled_channel_is_logged_as_a_rejection() {
    let harness = Harness::with_catalog(ChannelCatalog::new([ChannelConfig::default_for(
        ChannelKind::Email,
    )]));
    let client = harness.add_recipient("CLIENT");

    let batch = harness
        .engine
        .create_batch(announcement(
            TargetType::AllUsers,
            vec![ChannelKind::Email, ChannelKind::Chat],
        ))
        .await
        .unwrap();
    let finished = harness.engine.run_batch(batch.id).await.unwrap();

    assert_eq!(finished.sent_count, 1);

    let rejected: Vec<_> = harness
        .store
        .logs_for(client.id)
        .into_iter()
        .filter(|entry| entry.channel == ChannelKind::Chat)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].status, DeliveryStatus::Failed);
    assert!(rejected[0].metadata.permanent_failure);
    assert_eq!(rejected[0].template_key, Some(TemplateKey::SystemAnnouncement));
    assert!(
        rejected[0]
            .metadata
            .last_error
            .as_deref()
            .unwrap()
            .contains("channel disabled")
    );
}

#[tokio::test]
async fn completed_batch_is_audited() {
    let harness = Harness::new();
    harness.add_recipient("CLIENT");
    add_without_phone(&harness);

    let new_batch = announcement(TargetType::AllUsers, vec![ChannelKind::Sms]);
    let initiator = new_batch.created_by;
    let batch = harness.engine.create_batch(new_batch).await.unwrap();
    harness.engine.run_batch(batch.id).await.unwrap();

    let records = harness.store.audit_records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.action, BATCH_SENT_ACTION);
    assert_eq!(record.batch_id, batch.id);
    assert_eq!(record.template_key, "SYSTEM_ANNOUNCEMENT");
    assert_eq!(record.initiating_user, initiator);
    assert_eq!(
        (record.recipients_count, record.sent_count, record.failed_count),
        (2, 1, 1)
    );
}

#[tokio::test]
async fn batch_creation_validates_template_variables() {
    let harness = Harness::new();

    let mut new_batch = announcement(TargetType::AllUsers, vec![ChannelKind::Email]);
    new_batch.variables = HashMap::new();

    let result = harness.engine.create_batch(new_batch).await;

    assert!(matches!(result, Err(NotifyError::MissingVariables { .. })));
}

#[tokio::test]
async fn running_an_unknown_batch_is_an_error() {
    let harness = Harness::new();

    let result = harness.engine.run_batch(Uuid::new_v4()).await;

    assert!(matches!(result, Err(NotifyError::BatchNotFound(_))));
}

#[tokio::test]
async fn redelivered_batch_command_does_not_send_twice() {
    let harness = Harness::new();
    harness.add_recipient("CLIENT");

    let batch = harness
        .engine
        .create_batch(announcement(TargetType::AllUsers, vec![ChannelKind::Email]))
        .await
        .unwrap();

    let first = harness.engine.run_batch(batch.id).await.unwrap();
    let second = harness.engine.run_batch(batch.id).await.unwrap();

    assert_eq!(first.status, BatchStatus::Sent);
    assert_eq!(second.status, BatchStatus::Sent);
    assert_eq!(second.sent_count, 1);
    assert_eq!(harness.sender.sent().len(), 1);
    assert_eq!(harness.store.logs().len(), 1);
    assert_eq!(harness.store.audit_records().len(), 1);
}

#[tokio::test]
async fn concurrent_runs_of_one_batch_fan_out_once() {
    let harness = Harness::new();
    for _ in 0..3 {
        harness.add_recipient("CLIENT");
    }

    let batch = harness
        .engine
        .create_batch(announcement(TargetType::AllUsers, vec![ChannelKind::Email]))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        harness.engine.run_batch(batch.id),
        harness.engine.run_batch(batch.id)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(harness.sender.sent().len(), 3);
    let stored = BatchStore::find_by_id(&*harness.store, batch.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sent_count, 3);
}
