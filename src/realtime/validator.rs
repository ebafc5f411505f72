//! Field-rule validation engine for parsed message payloads.
//!
//! This is a dynamic, data-driven sibling to [`crate::validate`]'s hand-rolled
//! per-field functions: instead of one function per DTO field, handlers
//! declare a `FieldRules` map once and call [`FieldRules::validate`] against
//! a JSON payload. Applied after protocol parse and before routing, per §4.6.

use std::collections::HashMap;

use serde_json::Value;

use crate::realtime::error::RealtimeError;
use crate::realtime::protocol::ClientMessageType;

#[derive(Debug, Clone)]
pub enum Rule {
    Required,
    MinLength(usize),
    MaxLength(usize),
    /// A named predicate, e.g. "alphanumeric". Kept as a function pointer
    /// rather than a regex engine — no new dependency for a handful of
    /// character-class checks.
    Pattern(&'static str, fn(&str) -> bool),
    EnumMember(&'static [&'static str]),
}

#[derive(Debug, Clone, Default)]
pub struct FieldRules {
    rules: Vec<(String, Vec<Rule>)>,
}

impl FieldRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        rules: Vec<Rule>,
    ) -> Self {
        self.rules.push((name.into(), rules));
        self
    }

    /// Validate `payload` (expected to be a JSON object). Returns the first
    /// rule failure encountered, field-by-field in the order they were
    /// registered.
    pub fn validate(&self, payload: &Value) -> Result<(), RealtimeError> {
        let obj = payload.as_object();
        for (field, rules) in &self.rules {
            let value = obj.and_then(|o| o.get(field));
            for rule in rules {
                if let Err(message) = check_rule(rule, value) {
                    return Err(RealtimeError::ValidationFailed {
                        field: field.clone(),
                        message,
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_rule(rule: &Rule, value: Option<&Value>) -> Result<(), String> {
    match rule {
        Rule::Required => {
            if value.is_none_or(Value::is_null) {
                return Err("is required".to_string());
            }
        }
        Rule::MinLength(min) => {
            if let Some(s) = value.and_then(Value::as_str) {
                if s.len() < *min {
                    return Err(format!("must be at least {min} characters"));
                }
            }
        }
        Rule::MaxLength(max) => {
            if let Some(s) = value.and_then(Value::as_str) {
                if s.len() > *max {
                    return Err(format!("must be at most {max} characters"));
                }
            }
        }
        Rule::Pattern(name, predicate) => {
            if let Some(s) = value.and_then(Value::as_str) {
                if !predicate(s) {
                    return Err(format!("must match `{name}`"));
                }
            }
        }
        Rule::EnumMember(members) => {
            if let Some(s) = value.and_then(Value::as_str) {
                if !members.contains(&s) {
                    return Err(format!(
                        "must be one of {}",
                        members.join(", ")
                    ));
                }
            }
        }
    }
    Ok(())
}

pub fn alphanumeric_with_dashes(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Per-message-type [`FieldRules`], consulted by the read pump after
/// protocol decode and rate-limit admission, before the message reaches the
/// router (§4.6). Message types with no registered rules pass through
/// unvalidated.
#[derive(Debug, Clone, Default)]
pub struct ValidationRegistry {
    rules: HashMap<ClientMessageType, FieldRules>,
}

impl ValidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        msg_type: ClientMessageType,
        rules: FieldRules,
    ) -> Self {
        self.rules.insert(msg_type, rules);
        self
    }

    pub fn validate(
        &self,
        msg_type: ClientMessageType,
        payload: &Value,
    ) -> Result<(), RealtimeError> {
        match self.rules.get(&msg_type) {
            Some(rules) => rules.validate(payload),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_failing_field() {
        let rules = FieldRules::new()
            .field("conversation_id", vec![Rule::Required])
            .field("content", vec![Rule::MaxLength(4)]);
        let payload = serde_json::json!({ "content": "12345" });
        let err = rules.validate(&payload).unwrap_err();
        match err {
            RealtimeError::ValidationFailed { field, .. } => {
                assert_eq!(field, "conversation_id");
            }
            _ => panic!("expected ValidationFailed"),
        }
    }

    #[test]
    fn passes_when_all_rules_satisfied() {
        let rules = FieldRules::new().field(
            "call_id",
            vec![Rule::Required, Rule::MinLength(1), Rule::MaxLength(36)],
        );
        let payload = serde_json::json!({ "call_id": "abc" });
        assert!(rules.validate(&payload).is_ok());
    }

    #[test]
    fn enum_member_rejects_unknown_value() {
        let rules = FieldRules::new().field(
            "platform",
            vec![Rule::EnumMember(&["ios", "android", "web"])],
        );
        let payload = serde_json::json!({ "platform": "desktop" });
        assert!(rules.validate(&payload).is_err());
    }
}
