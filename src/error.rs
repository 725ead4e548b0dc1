use uuid::Uuid;

use crate::models::{channel::ChannelKind, template::TemplateKey};

/// Failure reported by a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network trouble, timeouts, throttling. Worth retrying later.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider rejected the message for good (bad address, bad payload).
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProviderError::Permanent(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template {template} is missing variables: {}", .missing.join(", "))]
    MissingVariables {
        template: TemplateKey,
        missing: Vec<String>,
    },

    #[error("channel disabled: {0}")]
    ChannelDisabled(ChannelKind),

    #[error("recipient not found or inactive: {0}")]
    RecipientNotFound(Uuid),

    #[error("batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("invalid statistics window: end is before start")]
    InvalidWindow,

    #[error("provider transient error: {0}")]
    ProviderTransient(String),

    #[error("provider permanent error: {0}")]
    ProviderPermanent(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl NotifyError {
    /// Caller mistakes and configuration state; resending the same request cannot help.
    pub fn is_permanent(&self) -> bool {
        !matches!(
            self,
            NotifyError::ProviderTransient(_) | NotifyError::Internal(_)
        )
    }
}

impl From<ProviderError> for NotifyError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(msg) => NotifyError::ProviderTransient(msg),
            ProviderError::Permanent(msg) => NotifyError::ProviderPermanent(msg),
        }
    }
}
