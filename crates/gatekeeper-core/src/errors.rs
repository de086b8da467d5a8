use std::time::Duration;

use crate::record::ExecutionRecord;
use crate::types::Priority;

/// Exceptional handler failure. Contained by the runner, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationDefect {
    pub message: String,
}

impl ValidationDefect {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Self::new(format!("timed out after {}ms", limit.as_millis()))
    }
}

/// Misconfiguration. Always fatal: the engine cannot produce a trustworthy result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate gate id '{0}'")]
    DuplicateGate(String),
    #[error("gate '{0}' declares no validations")]
    EmptyGate(String),
    #[error("gate '{gate}' lists validation '{name}' more than once")]
    DuplicateValidation { gate: String, name: String },
    #[error("no passing criteria for {0} priority")]
    MissingCriteria(Priority),
    #[error("{priority} criteria min_pass_rate {value} is outside 0..=100")]
    CriteriaOutOfRange { priority: Priority, value: f64 },
    #[error(
        "critical criteria must require a 100% pass rate and zero allowed failures"
    )]
    CriticalCriteriaRelaxed,
    #[error("unknown gate '{0}'")]
    UnknownGate(String),
    #[error("unknown validation '{0}'")]
    UnknownValidation(String),
    #[error("ordering constraint '{before}' -> '{after}' crosses priority tiers")]
    CrossTierOrdering { before: String, after: String },
    #[error("ordering cycle among {priority} gates: {}", gates.join(", "))]
    OrderingCycle {
        priority: Priority,
        gates: Vec<String>,
    },
    #[error("compliance flag '{flag}' references unknown gate '{gate}'")]
    UnknownComplianceGate { flag: String, gate: String },
    #[error("compliance flag '{0}' lists no gates")]
    EmptyRequirement(String),
}

impl ConfigError {
    /// Stable issue code used in check reports.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::DuplicateGate(_) => "E001",
            ConfigError::EmptyGate(_) => "E002",
            ConfigError::DuplicateValidation { .. } => "E003",
            ConfigError::CriteriaOutOfRange { .. } | ConfigError::MissingCriteria(_) => "E004",
            ConfigError::CriticalCriteriaRelaxed => "E005",
            ConfigError::UnknownGate(_) => "E006",
            ConfigError::CrossTierOrdering { .. } => "E007",
            ConfigError::OrderingCycle { .. } => "E008",
            ConfigError::UnknownComplianceGate { .. } => "E009",
            ConfigError::EmptyRequirement(_) => "E010",
            ConfigError::UnknownValidation(_) => "E011",
        }
    }
}

/// A blocking critical/high gate failed. Carries the partial record so the
/// gates that already ran stay visible.
#[derive(Debug, Clone, thiserror::Error)]
#[error("blocking {priority} gate '{gate_id}' failed; run aborted")]
pub struct OrchestrationAbort {
    pub gate_id: String,
    pub priority: Priority,
    pub record: ExecutionRecord,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Abort(Box<OrchestrationAbort>),
}

impl EngineError {
    /// Exit code for callers: abort is a failed run, config errors are distinct.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Abort(_) => 1,
            EngineError::Config(_) => 2,
        }
    }
}

impl From<OrchestrationAbort> for EngineError {
    fn from(abort: OrchestrationAbort) -> Self {
        EngineError::Abort(Box::new(abort))
    }
}

/// Structured check result for `gk check --json`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckReport {
    pub file: String,
    pub pass: bool,
    pub errors: Vec<CheckIssue>,
    pub warnings: Vec<CheckIssue>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckIssue {
    pub code: String,
    pub check: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
