use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationDefect;

/// Caller-supplied run parameters, passed untouched to every handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunContext(pub Map<String, Value>);

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// What a handler reports for an expected (non-exceptional) outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    #[serde(default)]
    pub details: Value,
    /// Reason for an expected failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    pub fn pass(details: Value) -> Self {
        Self {
            passed: true,
            details,
            error: None,
        }
    }

    pub fn fail(reason: impl Into<String>, details: Value) -> Self {
        Self {
            passed: false,
            details,
            error: Some(reason.into()),
        }
    }
}

/// A named check. Expected failures return `passed: false`; `Err` and
/// panics are reserved for defects and are contained by the runner.
pub trait ValidationHandler: Send + Sync {
    fn check(&self, ctx: &RunContext) -> Result<ValidationReport, ValidationDefect>;

    /// True when `check_within` stops its own work at the deadline. The
    /// runner then calls it inline instead of supervising a worker thread.
    fn honors_deadline(&self) -> bool {
        false
    }

    /// Like `check`, but must return by `limit`. A miss is reported as
    /// [`ValidationDefect::timed_out`] after the work has been stopped.
    fn check_within(
        &self,
        ctx: &RunContext,
        limit: Duration,
    ) -> Result<ValidationReport, ValidationDefect> {
        let _ = limit;
        self.check(ctx)
    }
}

impl<F> ValidationHandler for F
where
    F: Fn(&RunContext) -> Result<ValidationReport, ValidationDefect> + Send + Sync,
{
    fn check(&self, ctx: &RunContext) -> Result<ValidationReport, ValidationDefect> {
        self(ctx)
    }
}
