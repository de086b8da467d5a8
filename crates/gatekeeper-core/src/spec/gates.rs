use serde::{Deserialize, Serialize};

use crate::types::Priority;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDefinition {
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    pub priority: Priority,

    /// A failing blocking gate aborts the run when its tier can abort.
    #[serde(default)]
    pub blocking: bool,

    /// Deadline for the whole gate. `None` runs without a deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_budget_ms: Option<u64>,

    #[serde(rename = "validations")]
    pub validation_names: Vec<String>,
}

impl GateDefinition {
    pub fn new(id: &str, priority: Priority, validations: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            priority,
            blocking: false,
            timeout_budget_ms: None,
            validation_names: validations.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_budget_ms = Some(ms);
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// `before` always runs ahead of `after` within the same tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingConstraint {
    pub before: String,
    pub after: String,
}

impl OrderingConstraint {
    pub fn new(before: &str, after: &str) -> Self {
        Self {
            before: before.to_string(),
            after: after.to_string(),
        }
    }
}
