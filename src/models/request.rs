use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    channel::ChannelKind,
    log::LogMetadata,
    template::{Priority, TemplateKey},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Content {
    Template {
        key: TemplateKey,
        #[serde(default)]
        variables: HashMap<String, serde_json::Value>,
    },
    Custom {
        subject: Option<String>,
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub recipient_id: Uuid,
    pub channel: ChannelKind,
    pub content: Content,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub metadata: LogMetadata,
}

impl SendRequest {
    pub fn template(
        recipient_id: Uuid,
        channel: ChannelKind,
        key: TemplateKey,
        variables: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            recipient_id,
            channel,
            content: Content::Template { key, variables },
            priority: None,
            metadata: LogMetadata::default(),
        }
    }

    pub fn custom(
        recipient_id: Uuid,
        channel: ChannelKind,
        subject: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            channel,
            content: Content::Custom {
                subject,
                body: body.into(),
            },
            priority: None,
            metadata: LogMetadata::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_metadata(mut self, metadata: LogMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn template_key(&self) -> Option<TemplateKey> {
        match &self.content {
            Content::Template { key, .. } => Some(*key),
            Content::Custom { .. } => None,
        }
    }
}
