use crate::config::{NotificationsConfig, ValidationError};
use crate::endpoint::Notification;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Decides which notifications are delivered to the endpoint.
///
/// Patterns match at the start of the value, like a prefix match. A map filter
/// requires every one of its keys to be present in the notification with a string
/// value matching the pattern.
#[derive(Clone, Debug)]
pub struct NotificationFilter {
    publisher_id: Regex,
    event_type: Regex,
    context: Vec<(String, Regex)>,
    metadata: Vec<(String, Regex)>,
    payload: Vec<(String, Regex)>,
}

impl NotificationFilter {
    pub fn from_config(config: &NotificationsConfig) -> Result<Self, ValidationError> {
        Ok(NotificationFilter {
            publisher_id: compile("publisher_id", &config.publisher_id)?,
            event_type: compile("event_type", &config.event_type)?,
            context: compile_map("context", config.context.as_ref())?,
            metadata: compile_map("metadata", config.metadata.as_ref())?,
            payload: compile_map("payload", config.payload.as_ref())?,
        })
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        self.publisher_id.is_match(&notification.publisher_id)
            && self.event_type.is_match(&notification.event_type)
            && matches_map(&self.context, Some(&notification.context))
            && matches_map(&self.metadata, Some(&notification.metadata))
            && matches_map(&self.payload, notification.payload.as_object())
    }
}

fn compile(field: &str, pattern: &str) -> Result<Regex, ValidationError> {
    Regex::new(&format!("^(?:{pattern})")).map_err(|source| ValidationError::InvalidPattern {
        field: field.to_string(),
        pattern: pattern.to_string(),
        source,
    })
}

fn compile_map(
    field: &str,
    patterns: Option<&HashMap<String, String>>,
) -> Result<Vec<(String, Regex)>, ValidationError> {
    let mut compiled = Vec::new();
    for (key, pattern) in patterns.into_iter().flatten() {
        let regex = compile(&format!("{field}.{key}"), pattern)?;
        compiled.push((key.clone(), regex));
    }
    // Stable order keeps debug output readable.
    compiled.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(compiled)
}

fn matches_map(filters: &[(String, Regex)], data: Option<&Map<String, Value>>) -> bool {
    filters.iter().all(|(key, regex)| {
        data.and_then(|d| d.get(key))
            .and_then(Value::as_str)
            .is_some_and(|value| regex.is_match(value))
    })
}
