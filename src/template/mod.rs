//! Message templates and the placeholder rendering engine.
//!
//! A template belongs to exactly one (trigger, channel) pair and holds the
//! message body with `{variable}` placeholders. Rendering is pure string
//! work with no I/O:
//! - placeholders are matched as exact delimited tokens, so `{order}` can
//!   never bleed into `{order_number}`
//! - substituted values are emitted once and never re-scanned
//! - a placeholder whose key is not in the variable map is left untouched
//!
//! # Example
//!
//! ```ignore
//! let mut vars = BTreeMap::new();
//! vars.insert("customer_name".to_string(), json!("Awa"));
//! vars.insert("order_number".to_string(), json!("CMD-2081"));
//!
//! let text = render(
//!     "Bonjour {customer_name}, votre commande {order_number} est prête.",
//!     &vars,
//! );
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trigger::{Channel, RecipientKind, Trigger};

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template content is empty")]
    EmptyContent,

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// A message template for one (trigger, channel) pair.
///
/// Templates are authored in the back office and read-only here. At most
/// one template exists per pair; a missing or disabled one means the
/// channel does not apply to the trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// Business event this template serves
    pub trigger: Trigger,

    /// Delivery channel this body is written for
    pub channel: Channel,

    /// Human-readable template name
    pub name: String,

    /// Message body with {variable} placeholders
    pub content: String,

    /// Disabled templates are skipped without error
    pub enabled: bool,

    /// Who the message addresses, mirrors the trigger's routing
    pub recipient: RecipientKind,

    /// Template description (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl MessageTemplate {
    /// Create an enabled template with routing derived from the trigger.
    pub fn new(
        trigger: Trigger,
        channel: Channel,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            trigger,
            channel,
            name: name.into(),
            content: content.into(),
            enabled: true,
            recipient: trigger.recipient(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the template
    pub fn validate(&self) -> TemplateResult<()> {
        if self.content.trim().is_empty() {
            return Err(TemplateError::EmptyContent);
        }

        if self.name.is_empty() || self.name.len() > 256 {
            return Err(TemplateError::InvalidTemplate(
                "Name must be 1-256 characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Render this template's content with the given variables.
    pub fn render(&self, variables: &BTreeMap<String, serde_json::Value>) -> String {
        render(&self.content, variables)
    }
}

/// Substitute `{variable}` placeholders in a message body.
///
/// Single left-to-right scan. For every key present in the map, each
/// literal `{key}` occurrence becomes the value's string form (strings
/// verbatim, numbers in decimal, null as empty). Unknown placeholders stay
/// in the output exactly as written.
pub fn render(content: &str, variables: &BTreeMap<String, serde_json::Value>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];

        // The token ends at the next '}'. An earlier '{' restarts the
        // token there, keeping everything before it literal.
        let boundary = tail.find(|c| c == '}' || c == '{');
        match boundary {
            Some(pos) if tail[pos..].starts_with('}') => {
                let key = &tail[..pos];
                match variables.get(key) {
                    Some(value) => out.push_str(&value_to_text(value)),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &tail[pos + 1..];
            }
            Some(pos) => {
                // Nested '{' before any '}': emit up to it and rescan.
                out.push('{');
                out.push_str(&tail[..pos]);
                rest = &tail[pos..];
            }
            None => {
                // Unterminated brace, keep the remainder literal.
                out.push('{');
                out.push_str(tail);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// List the placeholder keys a message body references, in order.
pub fn placeholders(content: &str) -> Vec<&str> {
    let mut keys = Vec::new();
    let mut rest = content;

    while let Some(open) = rest.find('{') {
        let tail = &rest[open + 1..];
        match tail.find(|c| c == '}' || c == '{') {
            Some(pos) if tail[pos..].starts_with('}') => {
                keys.push(&tail[..pos]);
                rest = &tail[pos + 1..];
            }
            Some(pos) => rest = &tail[pos..],
            None => rest = "",
        }
    }

    keys
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        // Arrays and objects fall back to their JSON form
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_simple() {
        let v = vars(&[("name", json!("Awa"))]);
        assert_eq!(render("Bonjour {name}!", &v), "Bonjour Awa!");
    }

    #[test]
    fn test_render_multiple_occurrences() {
        let v = vars(&[("n", json!("CMD-1"))]);
        assert_eq!(render("{n} puis encore {n}", &v), "CMD-1 puis encore CMD-1");
    }

    #[test]
    fn test_exact_token_no_prefix_bleed() {
        // A value for `a` must not touch the `{ab}` placeholder.
        let v = vars(&[("a", json!("X"))]);
        assert_eq!(render("{a} {ab}", &v), "X {ab}");
    }

    #[test]
    fn test_exact_token_no_suffix_bleed() {
        let v = vars(&[("order_number", json!("CMD-9")), ("order", json!("nope"))]);
        assert_eq!(
            render("Commande {order_number}", &v),
            "Commande CMD-9"
        );
    }

    #[test]
    fn test_unknown_placeholder_left_untouched() {
        let v = vars(&[("known", json!("ok"))]);
        assert_eq!(
            render("{known} et {unknown}", &v),
            "ok et {unknown}"
        );
    }

    #[test]
    fn test_null_renders_empty() {
        let v = vars(&[("tracking_number", serde_json::Value::Null)]);
        assert_eq!(render("Suivi: {tracking_number}.", &v), "Suivi: .");
    }

    #[test]
    fn test_number_renders_decimal() {
        let v = vars(&[("count", json!(42)), ("total", json!(15000))]);
        assert_eq!(
            render("{count} articles, {total} CFA", &v),
            "42 articles, 15000 CFA"
        );
    }

    #[test]
    fn test_substituted_value_not_rescanned() {
        // A value containing brace syntax must come out literally.
        let v = vars(&[("a", json!("{b}")), ("b", json!("boom"))]);
        assert_eq!(render("{a}", &v), "{b}");
    }

    #[test]
    fn test_unterminated_brace_is_literal() {
        let v = vars(&[("a", json!("X"))]);
        assert_eq!(render("fin {a", &v), "fin {a");
    }

    #[test]
    fn test_nested_open_brace_restarts_token() {
        let v = vars(&[("b", json!("X"))]);
        assert_eq!(render("{a{b}c}", &v), "{aXc}");
    }

    #[test]
    fn test_empty_variables_leaves_content() {
        let v = BTreeMap::new();
        let content = "Bonjour {customer_name}, total {order_total}.";
        assert_eq!(render(content, &v), content);
    }

    #[test]
    fn test_placeholders_listing() {
        let keys = placeholders("Bonjour {customer_name}, commande {order_number} ({order_number})");
        assert_eq!(keys, vec!["customer_name", "order_number", "order_number"]);
    }

    #[test]
    fn test_template_new_derives_routing() {
        let t = MessageTemplate::new(
            Trigger::NewOrderAdmin,
            Channel::Sms,
            "Nouvelle commande",
            "Commande {order_number} de {customer_name}",
        );
        assert_eq!(t.recipient, RecipientKind::Admin);
        assert!(t.enabled);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_content() {
        let mut t = MessageTemplate::new(Trigger::OrderPlaced, Channel::Sms, "Test", "x");
        t.content = "   ".to_string();
        assert!(matches!(t.validate(), Err(TemplateError::EmptyContent)));
    }

    #[test]
    fn test_render_via_template() {
        let t = MessageTemplate::new(
            Trigger::OrderShipped,
            Channel::WhatsApp,
            "Expédition",
            "Votre commande {order_number} est en route. Suivi: {tracking_number}",
        );
        let v = vars(&[
            ("order_number", json!("CMD-77")),
            ("tracking_number", json!("TRK123")),
        ]);
        assert_eq!(
            t.render(&v),
            "Votre commande CMD-77 est en route. Suivi: TRK123"
        );
    }
}
