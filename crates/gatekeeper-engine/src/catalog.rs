use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use sha2::{Digest, Sha256};

use gatekeeper_core::errors::ConfigError;
use gatekeeper_core::spec::criteria::CriteriaTable;
use gatekeeper_core::spec::gates::{GateDefinition, OrderingConstraint};
use gatekeeper_core::spec::PipelineConfig;
use gatekeeper_core::types::Priority;

/// A configuration problem with the document path it was found at.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    pub path: String,
    pub error: ConfigError,
}

impl ConfigIssue {
    fn new(path: String, error: ConfigError) -> Self {
        Self { path, error }
    }
}

/// Resolved execution order for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierPlan {
    pub priority: Priority,
    pub gates: Vec<String>,
}

/// Validated, read-only gate definitions with their resolved schedule.
///
/// Construction checks:
/// 1. Gate ids are unique, every gate declares at least one validation,
///    validation names are unique within a gate
/// 2. Every tier has criteria in range; critical criteria are strict
/// 3. Ordering constraints name known gates of the tier they are declared
///    under and form no cycle
#[derive(Debug, Clone)]
pub struct GateCatalog {
    gates: Vec<GateDefinition>,
    /// Indices into `gates`, grouped by tier in precedence order.
    schedule: Vec<(Priority, Vec<usize>)>,
    criteria: CriteriaTable,
    fingerprint: String,
}

impl GateCatalog {
    pub fn new(
        gates: Vec<GateDefinition>,
        ordering: &BTreeMap<Priority, Vec<OrderingConstraint>>,
        criteria: CriteriaTable,
    ) -> Result<Self, ConfigError> {
        if let Some(issue) = audit(&gates, ordering, &criteria).into_iter().next() {
            return Err(issue.error);
        }
        let schedule = order_tiers(&gates, ordering).map_err(|issue| issue.error)?;
        let fingerprint = compute_fingerprint(&gates, &schedule, &criteria);
        Ok(Self {
            gates,
            schedule,
            criteria,
            fingerprint,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.gates.clone(),
            &config.ordering,
            config.criteria.clone(),
        )
    }

    /// Gates in declaration order.
    pub fn gates(&self) -> &[GateDefinition] {
        &self.gates
    }

    pub fn get(&self, id: &str) -> Option<&GateDefinition> {
        self.gates.iter().find(|g| g.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&GateDefinition, ConfigError> {
        self.get(id)
            .ok_or_else(|| ConfigError::UnknownGate(id.to_string()))
    }

    pub fn criteria(&self) -> &CriteriaTable {
        &self.criteria
    }

    /// `sha256:` digest of the scheduled gates and criteria.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Tiers in precedence order, each with its gates in execution order.
    pub fn tiers(&self) -> impl Iterator<Item = (Priority, Vec<&GateDefinition>)> + '_ {
        self.schedule
            .iter()
            .map(move |(priority, idx)| (*priority, self.pick(idx)))
    }

    fn pick(&self, idx: &[usize]) -> Vec<&GateDefinition> {
        idx.iter().map(|i| &self.gates[*i]).collect()
    }

    pub fn plan(&self) -> Vec<TierPlan> {
        self.tiers()
            .map(|(priority, gates)| TierPlan {
                priority,
                gates: gates.iter().map(|g| g.id.clone()).collect(),
            })
            .collect()
    }
}

/// Collect every configuration issue instead of stopping at the first.
pub fn audit(
    gates: &[GateDefinition],
    ordering: &BTreeMap<Priority, Vec<OrderingConstraint>>,
    criteria: &CriteriaTable,
) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();
    audit_gates(gates, &mut issues);
    audit_criteria(gates, criteria, &mut issues);
    audit_ordering(gates, ordering, &mut issues);
    if issues.is_empty() {
        if let Err(issue) = order_tiers(gates, ordering) {
            issues.push(issue);
        }
    }
    issues
}

fn audit_gates(gates: &[GateDefinition], issues: &mut Vec<ConfigIssue>) {
    let mut seen_ids = HashSet::new();
    for (i, gate) in gates.iter().enumerate() {
        if !seen_ids.insert(gate.id.as_str()) {
            issues.push(ConfigIssue::new(
                format!("$.gates[{i}].id"),
                ConfigError::DuplicateGate(gate.id.clone()),
            ));
        }
        if gate.validation_names.is_empty() {
            issues.push(ConfigIssue::new(
                format!("$.gates[{i}].validations"),
                ConfigError::EmptyGate(gate.id.clone()),
            ));
        }
        let mut seen_names = HashSet::new();
        for (j, name) in gate.validation_names.iter().enumerate() {
            if !seen_names.insert(name.as_str()) {
                issues.push(ConfigIssue::new(
                    format!("$.gates[{i}].validations[{j}]"),
                    ConfigError::DuplicateValidation {
                        gate: gate.id.clone(),
                        name: name.clone(),
                    },
                ));
            }
        }
    }
}

fn audit_criteria(
    gates: &[GateDefinition],
    criteria: &CriteriaTable,
    issues: &mut Vec<ConfigIssue>,
) {
    for (priority, c) in criteria.iter() {
        let path = format!("$.criteria.{priority}");
        if !c.is_in_range() {
            issues.push(ConfigIssue::new(
                path.clone(),
                ConfigError::CriteriaOutOfRange {
                    priority,
                    value: c.min_pass_rate,
                },
            ));
        }
        if priority == Priority::Critical && !c.is_strict() {
            issues.push(ConfigIssue::new(path, ConfigError::CriticalCriteriaRelaxed));
        }
    }
    // Only tiers that actually hold gates need criteria.
    let mut reported = HashSet::new();
    for gate in gates {
        if criteria.get(gate.priority).is_none() && reported.insert(gate.priority) {
            issues.push(ConfigIssue::new(
                format!("$.criteria.{}", gate.priority),
                ConfigError::MissingCriteria(gate.priority),
            ));
        }
    }
}

fn audit_ordering(
    gates: &[GateDefinition],
    ordering: &BTreeMap<Priority, Vec<OrderingConstraint>>,
    issues: &mut Vec<ConfigIssue>,
) {
    let by_id: HashMap<&str, &GateDefinition> = gates.iter().map(|g| (g.id.as_str(), g)).collect();
    for (tier, constraints) in ordering {
        for (i, c) in constraints.iter().enumerate() {
            let path = format!("$.ordering.{tier}[{i}]");
            let before = by_id.get(c.before.as_str());
            let after = by_id.get(c.after.as_str());
            for (id, found) in [(&c.before, before), (&c.after, after)] {
                if found.is_none() {
                    issues.push(ConfigIssue::new(
                        path.clone(),
                        ConfigError::UnknownGate(id.clone()),
                    ));
                }
            }
            if let (Some(b), Some(a)) = (before, after) {
                if b.priority != *tier || a.priority != *tier {
                    issues.push(ConfigIssue::new(
                        path,
                        ConfigError::CrossTierOrdering {
                            before: c.before.clone(),
                            after: c.after.clone(),
                        },
                    ));
                }
            }
        }
    }
}

/// Stable topological order per tier. Ties go to declaration order, so a
/// tier without constraints runs exactly as declared.
fn order_tiers(
    gates: &[GateDefinition],
    ordering: &BTreeMap<Priority, Vec<OrderingConstraint>>,
) -> Result<Vec<(Priority, Vec<usize>)>, ConfigIssue> {
    let mut schedule = Vec::new();
    for priority in Priority::ALL {
        let members: Vec<usize> = gates
            .iter()
            .enumerate()
            .filter(|(_, g)| g.priority == priority)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            continue;
        }
        let position: HashMap<&str, usize> = members
            .iter()
            .enumerate()
            .map(|(pos, i)| (gates[*i].id.as_str(), pos))
            .collect();

        let mut indegree = vec![0usize; members.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); members.len()];
        for c in ordering.get(&priority).map(Vec::as_slice).unwrap_or(&[]) {
            if let (Some(&b), Some(&a)) = (
                position.get(c.before.as_str()),
                position.get(c.after.as_str()),
            ) {
                successors[b].push(a);
                indegree[a] += 1;
            }
        }

        let mut placed = vec![false; members.len()];
        let mut ordered = Vec::with_capacity(members.len());
        while ordered.len() < members.len() {
            let Some(next) = first_ready(&placed, &indegree) else {
                let stuck = (0..members.len())
                    .filter(|p| !placed[*p])
                    .map(|p| gates[members[p]].id.clone())
                    .collect();
                return Err(ConfigIssue::new(
                    format!("$.ordering.{priority}"),
                    ConfigError::OrderingCycle {
                        priority,
                        gates: stuck,
                    },
                ));
            };
            placed[next] = true;
            for s in &successors[next] {
                indegree[*s] -= 1;
            }
            ordered.push(members[next]);
        }
        schedule.push((priority, ordered));
    }
    Ok(schedule)
}

fn first_ready(placed: &[bool], indegree: &[usize]) -> Option<usize> {
    (0..placed.len()).find(|&p| !placed[p] && indegree[p] == 0)
}

fn compute_fingerprint(
    gates: &[GateDefinition],
    schedule: &[(Priority, Vec<usize>)],
    criteria: &CriteriaTable,
) -> String {
    let scheduled: Vec<&GateDefinition> = schedule
        .iter()
        .flat_map(|(_, idx)| idx.iter().map(|i| &gates[*i]))
        .collect();
    let canonical = serde_json::to_vec(&(scheduled, criteria)).unwrap_or_default();
    format!("sha256:{:x}", Sha256::digest(&canonical))
}
