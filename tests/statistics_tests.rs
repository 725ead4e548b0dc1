use chrono::Duration;
use notification_engine::{
    error::NotifyError,
    models::{
        channel::ChannelKind,
        statistics::{ChannelStatusCount, TemplateCount},
        status::DeliveryStatus,
        template::TemplateKey,
    },
};
use tokio_test::assert_ok;

use crate::common::{Harness, entry_for, failed_entry, start_time};

#[tokio::test]
async fn averages_delivery_time_per_channel() {
    let harness = Harness::new();
    let client = harness.add_recipient("CLIENT");
    let window_start = start_time() - Duration::hours(1);

    // 33s, 35s .. 51s
    for offset in 0..10i64 {
        let created_at = window_start + Duration::minutes(offset);
        let mut entry = entry_for(&client, ChannelKind::Email, created_at);
        entry.template_key = Some(TemplateKey::PaymentReceived);
        entry.status = DeliveryStatus::Delivered;
        entry.sent_at = Some(created_at);
        entry.delivered_at = Some(created_at + Duration::seconds(33 + 2 * offset));
        harness.seed(entry).await;
    }
    harness
        .seed(failed_entry(&client, window_start + Duration::minutes(30)))
        .await;
    harness
        .seed(failed_entry(&client, window_start - Duration::minutes(1)))
        .await;

    let stats = assert_ok!(harness.engine.get_statistics(window_start, start_time()).await);

    assert_eq!(stats.period.start, window_start);
    assert_eq!(
        stats.by_channel_and_status,
        vec![
            ChannelStatusCount {
                channel: ChannelKind::Email,
                status: DeliveryStatus::Delivered,
                count: 10,
            },
            ChannelStatusCount {
                channel: ChannelKind::Email,
                status: DeliveryStatus::Failed,
                count: 1,
            },
        ]
    );
    assert_eq!(
        stats.by_template,
        vec![TemplateCount {
            template_key: TemplateKey::PaymentReceived,
            count: 10,
        }]
    );

    let average = stats.avg_delivery_time_by_channel[&ChannelKind::Email];
    assert!((average - 42.0).abs() < 1e-9, "average was {}", average);
    assert!(!stats.avg_delivery_time_by_channel.contains_key(&ChannelKind::Sms));
}

#[tokio::test]
async fn empty_window_reports_nothing() {
    let harness = Harness::new();

    let stats = harness
        .engine
        .get_statistics(start_time(), start_time())
        .await
        .unwrap();

    assert!(stats.by_channel_and_status.is_empty());
    assert!(stats.by_template.is_empty());
    assert!(stats.avg_delivery_time_by_channel.is_empty());
}

#[tokio::test]
async fn inverted_window_is_rejected() {
    let harness = Harness::new();

    let result = harness
        .engine
        .get_statistics(start_time(), start_time() - Duration::seconds(1))
        .await;

    assert!(matches!(result, Err(NotifyError::InvalidWindow)));
}
