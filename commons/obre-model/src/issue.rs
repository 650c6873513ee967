use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification key assigned to issues that do not carry their own
/// `type` field.
pub const BUSINESS_RULE_VIOLATION: &str = "businessRuleViolation";

/// Priority of a detected issue. The numeric mapping is part of the
/// script contract: validators report priorities as numbers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum IssuePriority {
    Error,
    Warning,
    Information,
}

impl IssuePriority {
    pub fn from_number(value: f64) -> Self {
        match value as i64 {
            1 => IssuePriority::Error,
            2 => IssuePriority::Warning,
            _ => IssuePriority::Information,
        }
    }

    pub fn number(&self) -> i64 {
        match self {
            IssuePriority::Error => 1,
            IssuePriority::Warning => 2,
            IssuePriority::Information => 4,
        }
    }
}

/// A validation or rule-execution finding. Purely a value type, no
/// identity beyond its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedIssue {
    pub priority: IssuePriority,
    pub text: String,
    pub type_key: String,
}

impl DetectedIssue {
    pub fn new(priority: IssuePriority, text: impl Into<String>) -> Self {
        Self {
            priority,
            text: text.into(),
            type_key: BUSINESS_RULE_VIOLATION.to_string(),
        }
    }

    /// Parse the loose map shape a validator callback returns:
    /// `{text, priority, type}`, every field optional.
    pub fn from_value(value: &Value) -> Self {
        let map = value.as_object();
        let text = map
            .and_then(|m| m.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let priority = map
            .and_then(|m| m.get("priority"))
            .and_then(|v| v.as_f64())
            .map(IssuePriority::from_number)
            .unwrap_or(IssuePriority::Information);
        let type_key = map
            .and_then(|m| m.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or(BUSINESS_RULE_VIOLATION)
            .to_string();
        Self {
            priority,
            text,
            type_key,
        }
    }
}
