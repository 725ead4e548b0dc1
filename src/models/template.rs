use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::models::channel::ChannelKind;

/// Every notification type the engine knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateKey {
    UserRegistered,
    RequestCreated,
    RequestAssigned,
    QuoteReceived,
    QuoteAccepted,
    PaymentReceived,
    RequestCompleted,
    AppointmentReminder,
    PasswordReset,
    SystemAnnouncement,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 10] = [
        TemplateKey::UserRegistered,
        TemplateKey::RequestCreated,
        TemplateKey::RequestAssigned,
        TemplateKey::QuoteReceived,
        TemplateKey::QuoteAccepted,
        TemplateKey::PaymentReceived,
        TemplateKey::RequestCompleted,
        TemplateKey::AppointmentReminder,
        TemplateKey::PasswordReset,
        TemplateKey::SystemAnnouncement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::UserRegistered => "USER_REGISTERED",
            TemplateKey::RequestCreated => "REQUEST_CREATED",
            TemplateKey::RequestAssigned => "REQUEST_ASSIGNED",
            TemplateKey::QuoteReceived => "QUOTE_RECEIVED",
            TemplateKey::QuoteAccepted => "QUOTE_ACCEPTED",
            TemplateKey::PaymentReceived => "PAYMENT_RECEIVED",
            TemplateKey::RequestCompleted => "REQUEST_COMPLETED",
            TemplateKey::AppointmentReminder => "APPOINTMENT_REMINDER",
            TemplateKey::PasswordReset => "PASSWORD_RESET",
            TemplateKey::SystemAnnouncement => "SYSTEM_ANNOUNCEMENT",
        }
    }
}

impl Display for TemplateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TemplateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
            Priority::Critical => "critical",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" | "medium" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Catalog entry. Built once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub key: TemplateKey,
    pub title: String,
    pub body: String,
    pub default_priority: Priority,
    pub default_channels: Vec<ChannelKind>,
    pub required_variables: Vec<String>,
}

/// Title and body after placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub body: String,
}
