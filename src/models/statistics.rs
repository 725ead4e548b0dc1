use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{channel::ChannelKind, status::DeliveryStatus, template::TemplateKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl StatisticsWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatusCount {
    pub channel: ChannelKind,
    pub status: DeliveryStatus,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateCount {
    pub template_key: TemplateKey,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStatistics {
    pub period: StatisticsWindow,
    pub by_channel_and_status: Vec<ChannelStatusCount>,
    pub by_template: Vec<TemplateCount>,
    /// Seconds between `sent_at` and `delivered_at`.
    pub avg_delivery_time_by_channel: BTreeMap<ChannelKind, f64>,
}
