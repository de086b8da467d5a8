use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority tier of a gate. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
}

impl Priority {
    /// All tiers in strict execution precedence.
    pub const ALL: [Priority; 3] = [Priority::Critical, Priority::High, Priority::Medium];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
        }
    }

    /// Whether a failing blocking gate of this tier aborts the run.
    pub fn can_abort(self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Passed,
    Failed,
}

/// Classification of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    Running,
    Passed,
    PassedWithWarnings,
    Failed,
}

impl OverallStatus {
    /// Process exit code for a caller following the CI convention.
    pub fn exit_code(self) -> i32 {
        match self {
            OverallStatus::Passed | OverallStatus::PassedWithWarnings => 0,
            OverallStatus::Running | OverallStatus::Failed => 1,
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallStatus::Running => "running",
            OverallStatus::Passed => "passed",
            OverallStatus::PassedWithWarnings => "passed_with_warnings",
            OverallStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}
