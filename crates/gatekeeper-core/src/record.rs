use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::RunContext;
use crate::types::{GateStatus, OverallStatus, Priority, ValidationStatus};

/// Outcome of one validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub name: String,
    pub status: ValidationStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub details: serde_json::Value,
    /// Reason reported by the handler for an expected failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Set only for exceptional failures (`status == error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ValidationOutcome {
    pub fn error(name: &str, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            status: ValidationStatus::Error,
            duration_ms,
            details: serde_json::Value::Null,
            reason: None,
            error_message: Some(message.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Passed
    }
}

/// Result of one gate. Never mutated once the gate finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate_id: String,
    pub priority: Priority,
    pub blocking: bool,
    pub validation_outcomes: Vec<ValidationOutcome>,
    pub passed_count: usize,
    pub total_count: usize,
    pub pass_rate: f64,
    pub status: GateStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl GateResult {
    pub fn passed(&self) -> bool {
        self.status == GateStatus::Passed
    }

    /// Saturates for loaded records whose counts disagree.
    pub fn failed_count(&self) -> usize {
        self.total_count.saturating_sub(self.passed_count)
    }
}

/// Percentage of passed validations. Zero totals are rejected upstream.
pub fn pass_rate(passed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    passed as f64 / total as f64 * 100.0
}

/// Complete, serializable outcome of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Fingerprint of the gate catalog that produced this record.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub catalog_hash: String,
    #[serde(default)]
    pub context: RunContext,
    /// Execution order is preserved; serialized as a JSON object keyed by gate id.
    #[serde(with = "ordered_results")]
    pub gate_results: Vec<GateResult>,
    pub overall_status: OverallStatus,
    #[serde(default)]
    pub compliance_flags: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(id: String, context: RunContext, catalog_hash: String) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            catalog_hash,
            context,
            gate_results: Vec::new(),
            overall_status: OverallStatus::Running,
            compliance_flags: BTreeMap::new(),
            abort_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.overall_status == OverallStatus::Running
    }

    pub fn gate_result(&self, gate_id: &str) -> Option<&GateResult> {
        self.gate_results.iter().find(|r| r.gate_id == gate_id)
    }

    /// Gate ids in execution order.
    pub fn executed_gates(&self) -> Vec<&str> {
        self.gate_results
            .iter()
            .map(|r| r.gate_id.as_str())
            .collect()
    }

    /// Stamp `ended_at` and the wall-clock duration.
    pub fn stamp_end(&mut self) {
        let now = Utc::now();
        let elapsed = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.ended_at = Some(now);
        self.duration_ms = Some(elapsed);
    }

    pub fn summary(&self) -> RunSummary {
        let mut s = RunSummary::default();
        for r in &self.gate_results {
            s.gates_run += 1;
            if r.passed() {
                s.gates_passed += 1;
            } else {
                s.gates_failed += 1;
            }
            s.validations_run = s.validations_run.saturating_add(r.total_count);
            s.validations_passed = s.validations_passed.saturating_add(r.passed_count);
        }
        s
    }
}

/// Counts for report headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub gates_run: usize,
    pub gates_passed: usize,
    pub gates_failed: usize,
    pub validations_run: usize,
    pub validations_passed: usize,
}

mod ordered_results {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::GateResult;

    pub fn serialize<S: Serializer>(results: &[GateResult], s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(results.len()))?;
        for r in results {
            map.serialize_entry(&r.gate_id, r)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<GateResult>, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Vec<GateResult>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of gate id to gate result")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, result)) = access.next_entry::<String, GateResult>()? {
                    if key != result.gate_id {
                        return Err(serde::de::Error::custom(format!(
                            "gate result key '{key}' does not match gate_id '{}'",
                            result.gate_id
                        )));
                    }
                    out.push(result);
                }
                Ok(out)
            }
        }

        d.deserialize_map(OrderedVisitor)
    }
}
