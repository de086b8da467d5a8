use serde_json::Value;

use gatekeeper_core::errors::{CheckIssue, CheckReport, ConfigError};
use gatekeeper_core::spec::PipelineConfig;
use gatekeeper_core::types::Priority;

use crate::catalog::{self, ConfigIssue};
use crate::compliance;

/// Full check of a raw pipeline document (for `gk check --json`).
pub fn check_value(data: &Value, file: &str, strict: bool) -> CheckReport {
    match serde_json::from_value::<PipelineConfig>(data.clone()) {
        Ok(config) => check(&config, file, strict, None),
        Err(e) => CheckReport {
            file: file.to_string(),
            pass: false,
            errors: vec![CheckIssue {
                code: "E000".to_string(),
                check: "parse".to_string(),
                message: e.to_string(),
                path: Some("$(root)".to_string()),
            }],
            warnings: Vec::new(),
        },
    }
}

/// Check a parsed document. `handlers`, when given, lists the validation
/// names the host can resolve.
pub fn check(
    config: &PipelineConfig,
    file: &str,
    strict: bool,
    handlers: Option<&[&str]>,
) -> CheckReport {
    let mut errors: Vec<CheckIssue> =
        catalog::audit(&config.gates, &config.ordering, &config.criteria)
            .into_iter()
            .map(issue_from)
            .collect();

    let ids: Vec<&str> = config.gates.iter().map(|g| g.id.as_str()).collect();
    errors.extend(
        compliance::audit_requirements(&config.compliance_requirements(), &ids)
            .into_iter()
            .map(issue_from),
    );

    if let Some(handlers) = handlers {
        check_handlers(config, handlers, &mut errors);
    }

    let mut warnings = Vec::new();
    lint_checks(config, &mut warnings);

    let pass = errors.is_empty() && (!strict || warnings.is_empty());
    CheckReport {
        file: file.to_string(),
        pass,
        errors,
        warnings,
    }
}

fn issue_from(issue: ConfigIssue) -> CheckIssue {
    let check = match &issue.error {
        ConfigError::DuplicateGate(_)
        | ConfigError::EmptyGate(_)
        | ConfigError::DuplicateValidation { .. } => "gates",
        ConfigError::MissingCriteria(_)
        | ConfigError::CriteriaOutOfRange { .. }
        | ConfigError::CriticalCriteriaRelaxed => "criteria",
        ConfigError::UnknownGate(_)
        | ConfigError::CrossTierOrdering { .. }
        | ConfigError::OrderingCycle { .. } => "ordering",
        ConfigError::UnknownComplianceGate { .. } | ConfigError::EmptyRequirement(_) => {
            "compliance"
        }
        ConfigError::UnknownValidation(_) => "handlers",
    };
    CheckIssue {
        code: issue.error.code().to_string(),
        check: check.to_string(),
        message: issue.error.to_string(),
        path: Some(issue.path),
    }
}

fn check_handlers(config: &PipelineConfig, handlers: &[&str], errors: &mut Vec<CheckIssue>) {
    for (i, gate) in config.gates.iter().enumerate() {
        for (j, name) in gate.validation_names.iter().enumerate() {
            if !handlers.contains(&name.as_str()) {
                let error = ConfigError::UnknownValidation(name.clone());
                errors.push(CheckIssue {
                    code: error.code().to_string(),
                    check: "handlers".to_string(),
                    message: format!("{error} (gate '{}')", gate.id),
                    path: Some(format!("$.gates[{i}].validations[{j}]")),
                });
            }
        }
    }
}

fn lint_checks(config: &PipelineConfig, warnings: &mut Vec<CheckIssue>) {
    for (i, gate) in config.gates.iter().enumerate() {
        if gate.blocking && gate.priority == Priority::Medium {
            warnings.push(CheckIssue {
                code: "W001".to_string(),
                check: "lint".to_string(),
                message: format!(
                    "gate '{}' is blocking but medium priority gates never abort a run",
                    gate.id
                ),
                path: Some(format!("$.gates[{i}].blocking")),
            });
        }
        match gate.timeout_budget_ms {
            None => warnings.push(CheckIssue {
                code: "W002".to_string(),
                check: "lint".to_string(),
                message: format!("gate '{}' has no timeout budget", gate.id),
                path: Some(format!("$.gates[{i}]")),
            }),
            Some(0) => warnings.push(CheckIssue {
                code: "W003".to_string(),
                check: "lint".to_string(),
                message: format!(
                    "gate '{}' has a zero timeout budget; every validation will be skipped",
                    gate.id
                ),
                path: Some(format!("$.gates[{i}].timeout_budget_ms")),
            }),
            Some(_) => {}
        }
    }
}
