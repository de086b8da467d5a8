pub mod compliance;
pub mod criteria;
pub mod gates;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use self::compliance::ComplianceRequirement;
use self::criteria::CriteriaTable;
use self::gates::{GateDefinition, OrderingConstraint};
use crate::types::Priority;

/// Top-level pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema_uri: Option<String>,

    pub gates: Vec<GateDefinition>,

    #[serde(default)]
    pub criteria: CriteriaTable,

    /// Partial order per tier. Tiers without constraints run in declaration order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ordering: BTreeMap<Priority, Vec<OrderingConstraint>>,

    /// Flag name → gate ids that must all pass.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compliance: BTreeMap<String, Vec<String>>,

    /// Handler parameters keyed by validation name, interpreted by the host.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, serde_json::Value>,
}

impl PipelineConfig {
    pub fn new(gates: Vec<GateDefinition>) -> Self {
        Self {
            schema_uri: None,
            gates,
            criteria: CriteriaTable::default(),
            ordering: BTreeMap::new(),
            compliance: BTreeMap::new(),
            checks: BTreeMap::new(),
        }
    }

    /// Load a pipeline document from a JSON file.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
        serde_json::from_str(&content).with_context(|| format!("{path}: invalid pipeline JSON"))
    }

    pub fn compliance_requirements(&self) -> Vec<ComplianceRequirement> {
        self.compliance
            .iter()
            .map(|(flag, gates)| ComplianceRequirement {
                flag: flag.clone(),
                gates: gates.clone(),
            })
            .collect()
    }

    pub fn gate(&self, id: &str) -> Option<&GateDefinition> {
        self.gates.iter().find(|g| g.id == id)
    }
}
