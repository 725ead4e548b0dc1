use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Real-time push to connected devices.
    Push,
    Email,
    Sms,
    /// Chat messaging (WhatsApp and similar).
    Chat,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Push,
        ChannelKind::Email,
        ChannelKind::Sms,
        ChannelKind::Chat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Push => "push",
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Chat => "chat",
        }
    }

    /// Channels that can only carry plain text.
    pub fn is_plain_text(&self) -> bool {
        matches!(self, ChannelKind::Sms | ChannelKind::Chat)
    }
}

impl Display for ChannelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" | "websocket" | "in_app" => Ok(ChannelKind::Push),
            "email" => Ok(ChannelKind::Email),
            "sms" => Ok(ChannelKind::Sms),
            "chat" | "whatsapp" => Ok(ChannelKind::Chat),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_per_hour: u32,
    pub max_per_day: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub enabled: bool,
    pub requires_auth: bool,
    pub rate_limit: Option<RateLimit>,
}

impl ChannelConfig {
    pub fn default_for(kind: ChannelKind) -> Self {
        let (requires_auth, rate_limit) = match kind {
            ChannelKind::Push => (false, None),
            ChannelKind::Email => (
                true,
                Some(RateLimit {
                    max_per_hour: 100,
                    max_per_day: 1000,
                }),
            ),
            ChannelKind::Sms => (
                true,
                Some(RateLimit {
                    max_per_hour: 50,
                    max_per_day: 500,
                }),
            ),
            ChannelKind::Chat => (
                true,
                Some(RateLimit {
                    max_per_hour: 100,
                    max_per_day: 1000,
                }),
            ),
        };

        Self {
            kind,
            enabled: true,
            requires_auth,
            rate_limit,
        }
    }
}

/// Static per-channel capabilities, one entry per transport.
#[derive(Debug, Clone)]
pub struct ChannelCatalog {
    channels: BTreeMap<ChannelKind, ChannelConfig>,
}

impl ChannelCatalog {
    pub fn new(configs: impl IntoIterator<Item = ChannelConfig>) -> Self {
        let mut channels: BTreeMap<ChannelKind, ChannelConfig> = ChannelKind::ALL
            .into_iter()
            .map(|kind| {
                let mut config = ChannelConfig::default_for(kind);
                config.enabled = false;
                (kind, config)
            })
            .collect();

        for config in configs {
            channels.insert(config.kind, config);
        }

        Self { channels }
    }

    pub fn all_enabled() -> Self {
        Self::new(ChannelKind::ALL.into_iter().map(ChannelConfig::default_for))
    }

    pub fn get(&self, kind: ChannelKind) -> &ChannelConfig {
        // every kind is inserted by `new`
        &self.channels[&kind]
    }

    pub fn is_enabled(&self, kind: ChannelKind) -> bool {
        self.get(kind).enabled
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.values()
    }
}
