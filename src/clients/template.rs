use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::{
    error::NotifyError,
    formatter::{self, VariableCheck},
    models::{
        channel::ChannelKind,
        template::{Priority, RenderedContent, Template, TemplateKey},
    },
};

/// Read-only template catalog, populated once at startup.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<TemplateKey, Template>,
}

impl TemplateRegistry {
    pub fn new(templates: impl IntoIterator<Item = Template>) -> Self {
        let templates: BTreeMap<TemplateKey, Template> = templates
            .into_iter()
            .map(|template| (template.key, template))
            .collect();

        info!(template_count = templates.len(), "Template registry initialized");

        Self { templates }
    }

    pub fn lookup(&self, key: TemplateKey) -> Result<&Template, NotifyError> {
        self.templates
            .get(&key)
            .ok_or_else(|| NotifyError::TemplateNotFound(key.to_string()))
    }

    pub fn lookup_str(&self, key: &str) -> Result<&Template, NotifyError> {
        let key = key
            .parse::<TemplateKey>()
            .map_err(NotifyError::TemplateNotFound)?;
        self.lookup(key)
    }

    pub fn validate(
        &self,
        key: &str,
        variables: &HashMap<String, serde_json::Value>,
    ) -> VariableCheck {
        formatter::validate_variables(self.lookup_str(key).ok(), variables)
    }

    /// Validates and substitutes; fails with `MissingVariables` listing every gap.
    pub fn render(
        &self,
        key: TemplateKey,
        variables: &HashMap<String, serde_json::Value>,
    ) -> Result<(&Template, RenderedContent), NotifyError> {
        let template = self.lookup(key)?;

        let check = formatter::validate_variables(Some(template), variables);
        if !check.valid {
            return Err(NotifyError::MissingVariables {
                template: key,
                missing: check.missing,
            });
        }

        debug!(
            template_key = %key,
            variable_count = variables.len(),
            "Rendering template"
        );

        Ok((template, formatter::render(template, variables)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new(default_catalog())
    }
}

fn entry(
    key: TemplateKey,
    title: &str,
    body: &str,
    default_priority: Priority,
    default_channels: &[ChannelKind],
    required_variables: &[&str],
) -> Template {
    Template {
        key,
        title: title.to_string(),
        body: body.to_string(),
        default_priority,
        default_channels: default_channels.to_vec(),
        required_variables: required_variables.iter().map(|v| v.to_string()).collect(),
    }
}

pub fn default_catalog() -> Vec<Template> {
    use ChannelKind::{Chat, Email, Push, Sms};
    use TemplateKey::*;

    vec![
        entry(
            UserRegistered,
            "Benvenuto {{fullName}}!",
            "<h2>Benvenuto {{fullName}}!</h2><p>Il tuo account è stato creato con successo.</p><p><a href=\"{{verificationUrl}}\">Verifica la tua email</a></p>",
            Priority::Normal,
            &[Email],
            &["fullName", "verificationUrl"],
        ),
        entry(
            RequestCreated,
            "Richiesta #{{requestId}} creata",
            "<p>Ciao {{clientName}},</p><p>La tua richiesta \"<strong>{{requestTitle}}</strong>\" è stata registrata con ID #{{requestId}}.</p>",
            Priority::Normal,
            &[Push, Email],
            &["clientName", "requestTitle", "requestId"],
        ),
        entry(
            RequestAssigned,
            "Professionista assegnato",
            "<p>{{professionalName}} gestirà la tua richiesta.</p><p>Tel: {{professionalPhone}}</p>",
            Priority::High,
            &[Push, Email, Sms],
            &["professionalName", "professionalPhone"],
        ),
        entry(
            QuoteReceived,
            "Nuovo preventivo: €{{amount}}",
            "Hai ricevuto un preventivo di €{{amount}} da {{professionalName}}",
            Priority::High,
            &[Push, Email],
            &["amount", "professionalName"],
        ),
        entry(
            QuoteAccepted,
            "Preventivo accettato!",
            "<p>{{clientName}} ha accettato il tuo preventivo di €{{amount}}</p><p>Contatta il cliente: {{clientPhone}}</p>",
            Priority::High,
            &[Push, Email, Sms],
            &["clientName", "amount", "clientPhone"],
        ),
        entry(
            PaymentReceived,
            "Pagamento €{{amount}} ricevuto",
            "<p>Importo: <strong>€{{amount}}</strong></p><p>Cliente: {{clientName}}</p><p>ID Transazione: {{transactionId}}</p>",
            Priority::Normal,
            &[Email],
            &["amount", "clientName", "transactionId"],
        ),
        entry(
            RequestCompleted,
            "Servizio completato",
            "<p>Il servizio \"{{requestTitle}}\" è stato completato.</p><p>Professionista: {{professionalName}}</p><p><a href=\"{{reviewUrl}}\">Lascia una recensione</a></p>",
            Priority::Normal,
            &[Push, Email],
            &["requestTitle", "professionalName", "reviewUrl"],
        ),
        entry(
            AppointmentReminder,
            "Promemoria appuntamento",
            "Promemoria: {{requestTitle}} domani ore {{time}} in {{address}}",
            Priority::High,
            &[Sms, Chat],
            &["requestTitle", "time", "address"],
        ),
        entry(
            PasswordReset,
            "Reset password richiesto",
            "<p>Hai richiesto di reimpostare la password.</p><p><a href=\"{{resetUrl}}\">Clicca qui per reimpostarla</a></p>",
            Priority::Urgent,
            &[Email],
            &["resetUrl"],
        ),
        entry(
            SystemAnnouncement,
            "{{title}}",
            "{{message}}",
            Priority::Normal,
            &[Push, Email],
            &["title", "message"],
        ),
    ]
}
