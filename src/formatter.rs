//! Placeholder substitution and per-channel shaping of notification bodies.
//!
//! Placeholders follow the `{{identifier}}` syntax with `identifier` matching `\w+`.
//! Unknown placeholders are left in the output exactly as written.

use std::{collections::HashMap, sync::LazyLock};

use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::models::{
    channel::ChannelKind,
    template::{Priority, RenderedContent, Template},
};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));
static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break pattern is valid"));
static BLOCK_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(p|div|h[1-6]|li|ul|ol|tr|table)\s*>").expect("block pattern is valid")
});
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"));

const URGENT_BANNER: &str = "🚨 *URGENT* 🚨\n\n";
const HIGH_BANNER: &str = "📢 ";
const NEUTRAL_BANNER: &str = "💬 ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableCheck {
    pub valid: bool,
    pub missing: Vec<String>,
}

pub fn substitute(body: &str, variables: &HashMap<String, JsonValue>) -> String {
    PLACEHOLDER
        .replace_all(body, |caps: &Captures| match variables.get(&caps[1]) {
            Some(value) => value_to_text(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn value_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// `template` is `None` when the key did not resolve; the result is then invalid with an
/// empty `missing` list.
pub fn validate_variables(
    template: Option<&Template>,
    supplied: &HashMap<String, JsonValue>,
) -> VariableCheck {
    let Some(template) = template else {
        return VariableCheck {
            valid: false,
            missing: Vec::new(),
        };
    };

    let missing: Vec<String> = template
        .required_variables
        .iter()
        .filter(|name| !supplied.contains_key(name.as_str()))
        .cloned()
        .collect();

    VariableCheck {
        valid: missing.is_empty(),
        missing,
    }
}

pub fn render(template: &Template, variables: &HashMap<String, JsonValue>) -> RenderedContent {
    RenderedContent {
        subject: Some(substitute(&template.title, variables)),
        body: substitute(&template.body, variables),
    }
}

pub fn format_for_channel(channel: ChannelKind, raw_body: &str, priority: Priority) -> String {
    if !channel.is_plain_text() {
        return raw_body.to_string();
    }

    let banner = match priority {
        Priority::Urgent | Priority::Critical => URGENT_BANNER,
        Priority::High => HIGH_BANNER,
        Priority::Low | Priority::Normal => NEUTRAL_BANNER,
    };

    format!("{}{}", banner, strip_html(raw_body))
}

pub fn strip_html(html: &str) -> String {
    let text = LINE_BREAK.replace_all(html, "\n");
    let text = BLOCK_END.replace_all(&text, "\n\n");
    let text = ANY_TAG.replace_all(&text, "");

    // &amp; goes last so that "&amp;lt;" decodes to "&lt;" and not "<"
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    EXCESS_NEWLINES
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}
