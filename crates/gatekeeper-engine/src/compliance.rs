use std::collections::BTreeMap;

use gatekeeper_core::errors::ConfigError;
use gatekeeper_core::record::ExecutionRecord;
use gatekeeper_core::spec::compliance::ComplianceRequirement;

use crate::catalog::{ConfigIssue, GateCatalog};

/// Derive compliance flags from a finished (or aborted) record.
///
/// A flag holds iff every listed gate ran and passed. Gates absent from the
/// record, e.g. after an abort, make the flag false. Pure.
pub fn aggregate(
    record: &ExecutionRecord,
    requirements: &[ComplianceRequirement],
) -> BTreeMap<String, bool> {
    requirements
        .iter()
        .map(|req| {
            let satisfied = req
                .gates
                .iter()
                .all(|id| record.gate_result(id).is_some_and(|r| r.passed()));
            (req.flag.clone(), satisfied)
        })
        .collect()
}

/// Requirements must name at least one gate, and only gates the catalog knows.
pub fn audit_requirements(
    requirements: &[ComplianceRequirement],
    catalog_ids: &[&str],
) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();
    for req in requirements {
        if req.gates.is_empty() {
            issues.push(ConfigIssue {
                path: format!("$.compliance.{}", req.flag),
                error: ConfigError::EmptyRequirement(req.flag.clone()),
            });
        }
        for (i, gate) in req.gates.iter().enumerate() {
            if !catalog_ids.contains(&gate.as_str()) {
                issues.push(ConfigIssue {
                    path: format!("$.compliance.{}[{i}]", req.flag),
                    error: ConfigError::UnknownComplianceGate {
                        flag: req.flag.clone(),
                        gate: gate.clone(),
                    },
                });
            }
        }
    }
    issues
}

pub fn validate_requirements(
    requirements: &[ComplianceRequirement],
    catalog: &GateCatalog,
) -> Result<(), ConfigError> {
    let ids: Vec<&str> = catalog.gates().iter().map(|g| g.id.as_str()).collect();
    match audit_requirements(requirements, &ids).into_iter().next() {
        Some(issue) => Err(issue.error),
        None => Ok(()),
    }
}
