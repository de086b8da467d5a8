use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use gatekeeper_core::errors::ConfigError;
use gatekeeper_core::record::{pass_rate, GateResult, ValidationOutcome};
use gatekeeper_core::spec::criteria::{CriteriaTable, PassingCriteria};
use gatekeeper_core::spec::gates::GateDefinition;
use gatekeeper_core::traits::RunContext;
use gatekeeper_core::types::GateStatus;

use super::runner::{panic_message, ValidationRunner};
use crate::registry::ValidationRegistry;

/// Name of the synthetic outcome recorded when the executor itself fails.
pub const EXECUTOR_DEFECT: &str = "gate-executor";

/// Runs every validation of one gate and classifies the result.
///
/// Algorithm:
/// 1. Run validations sequentially in declaration order
/// 2. Give each validation the remaining gate budget as its deadline;
///    once the budget is spent, record the rest as errors without running them
/// 3. pass_rate = passed / total * 100
/// 4. passed iff pass_rate >= min_pass_rate and failures <= allowed_failures
pub struct GateExecutor<'a> {
    runner: ValidationRunner<'a>,
    criteria: &'a CriteriaTable,
}

impl<'a> GateExecutor<'a> {
    pub fn new(registry: &'a ValidationRegistry, criteria: &'a CriteriaTable) -> Self {
        Self {
            runner: ValidationRunner::new(registry),
            criteria,
        }
    }

    /// Configuration errors escape; everything else yields a well-formed result.
    pub fn execute(
        &self,
        gate: &GateDefinition,
        ctx: &RunContext,
    ) -> Result<GateResult, ConfigError> {
        if gate.validation_names.is_empty() {
            return Err(ConfigError::EmptyGate(gate.id.clone()));
        }
        let criteria = *self
            .criteria
            .get(gate.priority)
            .ok_or(ConfigError::MissingCriteria(gate.priority))?;

        let started_at = Utc::now();
        info!(gate = %gate.id, priority = %gate.priority, "gate started");

        let run = AssertUnwindSafe(|| self.run_validations(gate, ctx));
        let result = match panic::catch_unwind(run) {
            Ok(Ok(outcomes)) => classify(gate, &criteria, outcomes, started_at),
            Ok(Err(config)) => return Err(config),
            Err(payload) => {
                let message = format!("gate executor panicked: {}", panic_message(&*payload));
                error!(gate = %gate.id, "{message}");
                defect_result(gate, message, started_at)
            }
        };

        info!(
            gate = %gate.id,
            status = ?result.status,
            passed = result.passed_count,
            total = result.total_count,
            pass_rate = result.pass_rate,
            "gate finished"
        );
        Ok(result)
    }

    fn run_validations(
        &self,
        gate: &GateDefinition,
        ctx: &RunContext,
    ) -> Result<Vec<ValidationOutcome>, ConfigError> {
        let budget = gate.timeout_budget_ms.map(Duration::from_millis);
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(gate.validation_names.len());

        for name in &gate.validation_names {
            let deadline = match budget {
                None => None,
                Some(budget) => {
                    let remaining = budget.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        warn!(
                            gate = %gate.id,
                            validation = %name,
                            "timeout budget exhausted, skipping"
                        );
                        outcomes.push(ValidationOutcome::error(
                            name,
                            "gate timeout budget exhausted",
                            0,
                        ));
                        continue;
                    }
                    Some(remaining)
                }
            };
            outcomes.push(self.runner.run_with_deadline(name, ctx, deadline)?);
        }
        Ok(outcomes)
    }
}

fn classify(
    gate: &GateDefinition,
    criteria: &PassingCriteria,
    outcomes: Vec<ValidationOutcome>,
    started_at: DateTime<Utc>,
) -> GateResult {
    let total_count = outcomes.len();
    let passed_count = outcomes.iter().filter(|o| o.passed()).count();
    let rate = pass_rate(passed_count, total_count);
    let status = if criteria.accepts(rate, total_count - passed_count) {
        GateStatus::Passed
    } else {
        GateStatus::Failed
    };
    GateResult {
        gate_id: gate.id.clone(),
        priority: gate.priority,
        blocking: gate.blocking,
        validation_outcomes: outcomes,
        passed_count,
        total_count,
        pass_rate: rate,
        status,
        started_at,
        ended_at: Utc::now(),
    }
}

/// Failed result with one synthetic outcome describing an executor defect.
pub fn defect_result(
    gate: &GateDefinition,
    message: String,
    started_at: DateTime<Utc>,
) -> GateResult {
    GateResult {
        gate_id: gate.id.clone(),
        priority: gate.priority,
        blocking: gate.blocking,
        validation_outcomes: vec![ValidationOutcome::error(EXECUTOR_DEFECT, message, 0)],
        passed_count: 0,
        total_count: 1,
        pass_rate: 0.0,
        status: GateStatus::Failed,
        started_at,
        ended_at: Utc::now(),
    }
}
