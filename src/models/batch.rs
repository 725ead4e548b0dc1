use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    channel::ChannelKind,
    status::BatchStatus,
    template::{Priority, TemplateKey},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    AllUsers,
    Role,
    Custom,
    /// Anything the host stored that this engine does not understand.
    #[serde(other)]
    Unknown,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::AllUsers => "ALL_USERS",
            TargetType::Role => "ROLE",
            TargetType::Custom => "CUSTOM",
            TargetType::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ALL_USERS" => TargetType::AllUsers,
            "ROLE" => TargetType::Role,
            "CUSTOM" => TargetType::Custom,
            _ => TargetType::Unknown,
        }
    }
}

/// Filter handed to the recipient directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    AllActive,
    ActiveWithRole(String),
    ActiveWithIds(Vec<Uuid>),
    Nobody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: Uuid,
    pub template_key: String,
    pub target_type: TargetType,
    pub target_role: Option<String>,
    #[serde(default)]
    pub target_ids: Vec<Uuid>,
    #[serde(default)]
    pub channels: Vec<ChannelKind>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    pub priority: Option<Priority>,
    pub status: BatchStatus,
    pub total_recipients: u32,
    pub sent_count: u32,
    pub failed_count: u32,
    pub created_by: Uuid,
}

impl BatchJob {
    pub fn audience(&self) -> Audience {
        match self.target_type {
            TargetType::AllUsers => Audience::AllActive,
            TargetType::Role => match &self.target_role {
                Some(role) => Audience::ActiveWithRole(role.clone()),
                None => Audience::Nobody,
            },
            TargetType::Custom => Audience::ActiveWithIds(self.target_ids.clone()),
            TargetType::Unknown => Audience::Nobody,
        }
    }
}

/// Caller input for a new fan-out send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBatch {
    pub template_key: TemplateKey,
    pub target_type: TargetType,
    pub target_role: Option<String>,
    #[serde(default)]
    pub target_ids: Vec<Uuid>,
    #[serde(default)]
    pub channels: Vec<ChannelKind>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    pub priority: Option<Priority>,
    pub created_by: Uuid,
}

impl NewBatch {
    pub fn into_job(self) -> BatchJob {
        BatchJob {
            id: Uuid::new_v4(),
            template_key: self.template_key.as_str().to_string(),
            target_type: self.target_type,
            target_role: self.target_role,
            target_ids: self.target_ids,
            channels: self.channels,
            variables: self.variables,
            priority: self.priority,
            status: BatchStatus::Pending,
            total_recipients: 0,
            sent_count: 0,
            failed_count: 0,
            created_by: self.created_by,
        }
    }
}

/// Final counters written once the recipient loop is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub total_recipients: u32,
    pub sent_count: u32,
    pub failed_count: u32,
}

impl BatchOutcome {
    pub fn from_counts(sent_count: u32, failed_count: u32) -> Self {
        let total_recipients = sent_count + failed_count;
        let status = if total_recipients > 0 && failed_count == total_recipients {
            BatchStatus::Failed
        } else {
            BatchStatus::Sent
        };

        Self {
            status,
            total_recipients,
            sent_count,
            failed_count,
        }
    }
}
