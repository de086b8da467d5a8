use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use gatekeeper_core::errors::{ConfigError, EngineError, OrchestrationAbort};
use gatekeeper_core::record::{ExecutionRecord, GateResult};
use gatekeeper_core::spec::compliance::ComplianceRequirement;
use gatekeeper_core::spec::PipelineConfig;
use gatekeeper_core::traits::RunContext;
use gatekeeper_core::types::{OverallStatus, Priority};

use crate::catalog::{GateCatalog, TierPlan};
use crate::compliance;
use crate::gates::GateExecutor;
use crate::registry::ValidationRegistry;

/// Top-level driver for one pipeline.
///
/// Catalog, registry, and requirements are read-only and shared behind
/// `Arc`, so clones can run concurrently; every call builds its own record.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    catalog: Arc<GateCatalog>,
    registry: Arc<ValidationRegistry>,
    requirements: Arc<Vec<ComplianceRequirement>>,
}

impl Orchestrator {
    /// Resolves every handler up front so unregistered names fail before any run.
    pub fn new(
        catalog: GateCatalog,
        registry: ValidationRegistry,
        requirements: Vec<ComplianceRequirement>,
    ) -> Result<Self, ConfigError> {
        registry.ensure_covers(&catalog)?;
        compliance::validate_requirements(&requirements, &catalog)?;
        Ok(Self {
            catalog: Arc::new(catalog),
            registry: Arc::new(registry),
            requirements: Arc::new(requirements),
        })
    }

    pub fn from_config(
        config: &PipelineConfig,
        registry: ValidationRegistry,
    ) -> Result<Self, ConfigError> {
        let catalog = GateCatalog::from_config(config)?;
        Self::new(catalog, registry, config.compliance_requirements())
    }

    pub fn catalog(&self) -> &GateCatalog {
        &self.catalog
    }

    pub fn requirements(&self) -> &[ComplianceRequirement] {
        &self.requirements
    }

    /// Resolved schedule without running anything.
    pub fn plan(&self) -> Vec<TierPlan> {
        self.catalog.plan()
    }

    /// Run every gate, tier by tier.
    ///
    /// A failing blocking gate in a tier that can abort stops scheduling and
    /// returns [`EngineError::Abort`] with the partial record; its overall
    /// status stays `running`.
    pub fn execute_all_gates(&self, context: RunContext) -> Result<ExecutionRecord, EngineError> {
        let mut record = ExecutionRecord::new(
            Uuid::new_v4().to_string(),
            context,
            self.catalog.fingerprint().to_string(),
        );
        info!(
            run_id = %record.id,
            gates = self.catalog.gates().len(),
            "orchestration started"
        );
        let executor = GateExecutor::new(&self.registry, self.catalog.criteria());

        for (priority, gates) in self.catalog.tiers() {
            info!(run_id = %record.id, %priority, gates = gates.len(), "tier started");
            for gate in gates {
                let result = executor.execute(gate, &record.context)?;
                let failed = !result.passed();
                record.gate_results.push(result);

                if failed && gate.blocking && priority.can_abort() {
                    let message = format!("blocking {priority} gate '{}' failed", gate.id);
                    error!(run_id = %record.id, gate = %gate.id, "{message}; aborting run");
                    record.abort_error = Some(message);
                    record.stamp_end();
                    return Err(OrchestrationAbort {
                        gate_id: gate.id.clone(),
                        priority,
                        record,
                    }
                    .into());
                }
                if failed {
                    warn!(
                        run_id = %record.id,
                        gate = %gate.id,
                        blocking = gate.blocking,
                        "gate failed, continuing"
                    );
                }
            }
        }

        record.overall_status = classify_overall(&record.gate_results);
        record.stamp_end();
        record.compliance_flags = compliance::aggregate(&record, &self.requirements);
        info!(
            run_id = %record.id,
            status = %record.overall_status,
            duration_ms = record.duration_ms.unwrap_or(0),
            "orchestration finished"
        );
        Ok(record)
    }

    /// Run one gate in isolation. No abort rule applies.
    pub fn execute_gate(
        &self,
        gate_id: &str,
        context: &RunContext,
    ) -> Result<GateResult, ConfigError> {
        let gate = self.catalog.require(gate_id)?;
        GateExecutor::new(&self.registry, self.catalog.criteria())
            .execute(gate, context)
    }
}

/// Overall classification of a run that was not aborted.
pub fn classify_overall(results: &[GateResult]) -> OverallStatus {
    let critical_failed = results
        .iter()
        .any(|r| r.priority == Priority::Critical && !r.passed());
    let high_blocking_failed = results
        .iter()
        .any(|r| r.priority == Priority::High && r.blocking && !r.passed());
    if critical_failed || high_blocking_failed {
        OverallStatus::Failed
    } else if results.iter().any(|r| !r.passed()) {
        OverallStatus::PassedWithWarnings
    } else {
        OverallStatus::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::thread;

    use gatekeeper_core::errors::ValidationDefect;
    use gatekeeper_core::spec::criteria::CriteriaTable;
    use gatekeeper_core::spec::gates::{GateDefinition, OrderingConstraint};
    use gatekeeper_core::traits::ValidationReport;
    use gatekeeper_core::types::{GateStatus, ValidationStatus};
    use serde_json::json;

    type Check = Result<ValidationReport, ValidationDefect>;

    fn pass(_: &RunContext) -> Check {
        Ok(ValidationReport::pass(json!(null)))
    }

    fn fail(_: &RunContext) -> Check {
        Ok(ValidationReport::fail("nope", json!(null)))
    }

    fn broken(_: &RunContext) -> Check {
        Err(ValidationDefect::new("socket closed"))
    }

    /// Registry where every handler appends its name to a shared journal.
    fn journaled(names: &[(&str, bool)]) -> (ValidationRegistry, Arc<Mutex<Vec<String>>>) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ValidationRegistry::new();
        for (name, passes) in names {
            let journal = journal.clone();
            let label = name.to_string();
            let passes = *passes;
            registry.register(name, move |_: &RunContext| -> Check {
                journal.lock().unwrap().push(label.clone());
                if passes {
                    Ok(ValidationReport::pass(json!(null)))
                } else {
                    Ok(ValidationReport::fail("failed", json!(null)))
                }
            });
        }
        (registry, journal)
    }

    fn orchestrator(
        gates: Vec<GateDefinition>,
        ordering: BTreeMap<Priority, Vec<OrderingConstraint>>,
        registry: ValidationRegistry,
        requirements: Vec<ComplianceRequirement>,
    ) -> Orchestrator {
        let criteria = CriteriaTable::default();
        let catalog = GateCatalog::new(gates, &ordering, criteria).unwrap();
        Orchestrator::new(catalog, registry, requirements).unwrap()
    }

    fn abort_of(err: EngineError) -> OrchestrationAbort {
        match err {
            EngineError::Abort(abort) => *abort,
            other => panic!("expected abort, got {other}"),
        }
    }

    #[test]
    fn blocking_critical_failure_aborts_with_partial_record() {
        let registry = ValidationRegistry::new()
            .with("v1", pass)
            .with("v2", fail)
            .with("v3", pass);
        let o = orchestrator(
            vec![
                GateDefinition::new("G1", Priority::Critical, &["v1", "v2"])
                    .blocking(true),
                GateDefinition::new("G2", Priority::High, &["v3"]),
            ],
            BTreeMap::new(),
            registry,
            vec![],
        );
        let abort = abort_of(o.execute_all_gates(RunContext::new()).unwrap_err());
        assert_eq!(abort.gate_id, "G1");
        assert_eq!(abort.priority, Priority::Critical);

        let record = abort.record;
        assert_eq!(record.executed_gates(), vec!["G1"]);
        let g1 = record.gate_result("G1").unwrap();
        assert_eq!(g1.pass_rate, 50.0);
        assert_eq!(g1.status, GateStatus::Failed);
        assert_eq!(record.overall_status, OverallStatus::Running);
        assert!(record.abort_error.as_deref().unwrap().contains("G1"));
        assert!(record.ended_at.is_some());
    }

    #[test]
    fn blocking_high_failure_aborts() {
        let (registry, journal) = journaled(&[("a", true), ("b", false), ("c", true)]);
        let o = orchestrator(
            vec![
                GateDefinition::new("crit", Priority::Critical, &["a"]),
                GateDefinition::new("high", Priority::High, &["b"])
                    .blocking(true),
                GateDefinition::new("med", Priority::Medium, &["c"]),
            ],
            BTreeMap::new(),
            registry,
            vec![],
        );
        let abort = abort_of(o.execute_all_gates(RunContext::new()).unwrap_err());
        assert_eq!(abort.gate_id, "high");
        assert_eq!(*journal.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn non_blocking_failures_never_abort() {
        let registry = ValidationRegistry::new().with("ok", pass).with("bad", fail);
        let o = orchestrator(
            vec![
                GateDefinition::new("crit", Priority::Critical, &["ok"])
                    .blocking(true),
                GateDefinition::new("high", Priority::High, &["bad"]),
                GateDefinition::new("med", Priority::Medium, &["bad"]),
            ],
            BTreeMap::new(),
            registry,
            vec![],
        );
        let record = o.execute_all_gates(RunContext::new()).unwrap();
        assert_eq!(record.executed_gates(), vec!["crit", "high", "med"]);
        assert_eq!(record.overall_status, OverallStatus::PassedWithWarnings);
        assert!(record.abort_error.is_none());
    }

    #[test]
    fn non_blocking_critical_failure_fails_the_run() {
        let registry = ValidationRegistry::new().with("ok", pass).with("bad", fail);
        let o = orchestrator(
            vec![
                GateDefinition::new("crit", Priority::Critical, &["bad"]),
                GateDefinition::new("med", Priority::Medium, &["ok"]),
            ],
            BTreeMap::new(),
            registry,
            vec![],
        );
        let record = o.execute_all_gates(RunContext::new()).unwrap();
        assert_eq!(record.executed_gates(), vec!["crit", "med"]);
        assert_eq!(record.overall_status, OverallStatus::Failed);
    }

    #[test]
    fn blocking_medium_failure_never_aborts() {
        let registry = ValidationRegistry::new().with("ok", pass).with("bad", fail);
        let o = orchestrator(
            vec![
                GateDefinition::new("m1", Priority::Medium, &["bad"])
                    .blocking(true),
                GateDefinition::new("m2", Priority::Medium, &["ok"]),
            ],
            BTreeMap::new(),
            registry,
            vec![],
        );
        let record = o.execute_all_gates(RunContext::new()).unwrap();
        assert_eq!(record.executed_gates(), vec!["m1", "m2"]);
        assert_eq!(record.overall_status, OverallStatus::PassedWithWarnings);
    }

    #[test]
    fn tiers_and_custom_order_are_respected() {
        let (registry, journal) = journaled(&[("va", true), ("vb", true), ("vc", true)]);
        let mut ordering = BTreeMap::new();
        ordering.insert(Priority::Critical, vec![OrderingConstraint::new("A", "B")]);
        let o = orchestrator(
            vec![
                GateDefinition::new("C", Priority::High, &["vc"]),
                GateDefinition::new("B", Priority::Critical, &["vb"]),
                GateDefinition::new("A", Priority::Critical, &["va"]),
            ],
            ordering,
            registry,
            vec![],
        );
        let record = o.execute_all_gates(RunContext::new()).unwrap();
        assert_eq!(record.executed_gates(), vec!["A", "B", "C"]);
        assert_eq!(*journal.lock().unwrap(), vec!["va", "vb", "vc"]);
        assert_eq!(record.overall_status, OverallStatus::Passed);
    }

    #[test]
    fn compliance_flags_are_attached() {
        let registry = ValidationRegistry::new().with("ok", pass).with("bad", fail);
        let o = orchestrator(
            vec![
                GateDefinition::new("G1", Priority::High, &["ok"]),
                GateDefinition::new("G2", Priority::Medium, &["bad"]),
            ],
            BTreeMap::new(),
            registry,
            vec![
                ComplianceRequirement::new("release_ready", &["G1", "G2"]),
                ComplianceRequirement::new("core_ok", &["G1"]),
            ],
        );
        let record = o.execute_all_gates(RunContext::new()).unwrap();
        assert!(!record.compliance_flags["release_ready"]);
        assert!(record.compliance_flags["core_ok"]);
    }

    #[test]
    fn defect_in_one_validation_is_isolated_in_full_run() {
        let registry = ValidationRegistry::new()
            .with("v1", broken)
            .with("v2", pass);
        let o = orchestrator(
            vec![GateDefinition::new("g", Priority::Medium, &["v1", "v2"])],
            BTreeMap::new(),
            registry,
            vec![],
        );
        let record = o.execute_all_gates(RunContext::new()).unwrap();
        let g = record.gate_result("g").unwrap();
        assert_eq!(g.validation_outcomes[0].status, ValidationStatus::Error);
        assert_eq!(g.validation_outcomes[1].status, ValidationStatus::Passed);
        assert_eq!(g.passed_count, 1);
    }

    #[test]
    fn unregistered_validation_fails_at_construction() {
        let catalog = GateCatalog::new(
            vec![GateDefinition::new("g", Priority::High, &["ghost"])],
            &BTreeMap::new(),
            CriteriaTable::default(),
        )
        .unwrap();
        let registry = ValidationRegistry::new();
        let err = Orchestrator::new(catalog, registry, vec![]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownValidation("ghost".into()));
    }

    #[test]
    fn requirement_on_unknown_gate_fails_at_construction() {
        let catalog = GateCatalog::new(
            vec![GateDefinition::new("g", Priority::High, &["ok"])],
            &BTreeMap::new(),
            CriteriaTable::default(),
        )
        .unwrap();
        let err = Orchestrator::new(
            catalog,
            ValidationRegistry::new().with("ok", pass),
            vec![ComplianceRequirement::new("f", &["nope"])],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownComplianceGate {
                flag: "f".into(),
                gate: "nope".into()
            }
        );
    }

    #[test]
    fn execute_gate_runs_one_gate_or_reports_unknown() {
        let registry = ValidationRegistry::new().with("ok", pass);
        let o = orchestrator(
            vec![GateDefinition::new("g", Priority::High, &["ok"])],
            BTreeMap::new(),
            registry,
            vec![],
        );
        let result = o.execute_gate("g", &RunContext::new()).unwrap();
        assert!(result.passed());
        assert_eq!(
            o.execute_gate("missing", &RunContext::new()).unwrap_err(),
            ConfigError::UnknownGate("missing".into())
        );
    }

    #[test]
    fn context_reaches_handlers_and_record() {
        let registry = ValidationRegistry::new().with("env", |ctx: &RunContext| -> Check {
            match ctx.get("env").and_then(|v| v.as_str()) {
                Some("prod") => Ok(ValidationReport::pass(json!({"env": "prod"}))),
                _ => Ok(ValidationReport::fail("wrong env", json!(null))),
            }
        });
        let o = orchestrator(
            vec![GateDefinition::new("g", Priority::High, &["env"])],
            BTreeMap::new(),
            registry,
            vec![],
        );
        let record = o
            .execute_all_gates(RunContext::new().with("env", "prod"))
            .unwrap();
        assert_eq!(record.overall_status, OverallStatus::Passed);
        assert_eq!(record.context.get("env").unwrap(), "prod");
        assert_eq!(record.catalog_hash, o.catalog().fingerprint());
    }

    #[test]
    fn concurrent_runs_do_not_share_records() {
        let registry = ValidationRegistry::new().with("ok", pass);
        let o = orchestrator(
            vec![GateDefinition::new("g", Priority::High, &["ok"])],
            BTreeMap::new(),
            registry,
            vec![],
        );
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let o = o.clone();
                thread::spawn(move || {
                    let ctx = RunContext::new().with("run", i);
                    o.execute_all_gates(ctx).unwrap()
                })
            })
            .collect();
        let records: Vec<ExecutionRecord> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let mut ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        for r in &records {
            assert_eq!(r.gate_results.len(), 1);
            assert_eq!(r.overall_status, OverallStatus::Passed);
        }
    }

    #[test]
    fn record_serializes_to_json() {
        let registry = ValidationRegistry::new().with("ok", pass);
        let o = orchestrator(
            vec![GateDefinition::new("g", Priority::High, &["ok"])],
            BTreeMap::new(),
            registry,
            vec![ComplianceRequirement::new("ready", &["g"])],
        );
        let record = o.execute_all_gates(RunContext::new()).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["overall_status"], "passed");
        assert_eq!(json["gate_results"]["g"]["status"], "passed");
        assert_eq!(json["compliance_flags"]["ready"], true);
    }

    #[test]
    fn classify_overall_precedence() {
        use chrono::Utc;
        let r = |p: Priority, blocking: bool, status: GateStatus| GateResult {
            gate_id: "x".into(),
            priority: p,
            blocking,
            validation_outcomes: vec![],
            passed_count: 0,
            total_count: 1,
            pass_rate: 0.0,
            status,
            started_at: Utc::now(),
            ended_at: Utc::now(),
        };
        assert_eq!(classify_overall(&[]), OverallStatus::Passed);
        assert_eq!(
            classify_overall(&[r(Priority::Critical, false, GateStatus::Failed)]),
            OverallStatus::Failed
        );
        assert_eq!(
            classify_overall(&[r(Priority::High, true, GateStatus::Failed)]),
            OverallStatus::Failed
        );
        assert_eq!(
            classify_overall(&[r(Priority::High, false, GateStatus::Failed)]),
            OverallStatus::PassedWithWarnings
        );
        assert_eq!(
            classify_overall(&[r(Priority::Medium, true, GateStatus::Failed)]),
            OverallStatus::PassedWithWarnings
        );
        assert_eq!(
            classify_overall(&[r(Priority::Medium, false, GateStatus::Passed)]),
            OverallStatus::Passed
        );
    }
}
