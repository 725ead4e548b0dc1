use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::channel::ChannelKind;

/// A user of the host application as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub push_token: Option<String>,
    pub role: String,
    pub active: bool,
}

impl Recipient {
    pub fn address_for(&self, channel: ChannelKind) -> Option<&str> {
        let address = match channel {
            ChannelKind::Email => self.email.as_deref(),
            ChannelKind::Sms | ChannelKind::Chat => self.phone.as_deref(),
            ChannelKind::Push => self.push_token.as_deref(),
        };

        address.filter(|a| !a.trim().is_empty())
    }
}
