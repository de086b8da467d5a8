use serde::{Deserialize, Serialize};

/// A named flag satisfied iff every listed gate passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRequirement {
    pub flag: String,
    pub gates: Vec<String>,
}

impl ComplianceRequirement {
    pub fn new(flag: &str, gates: &[&str]) -> Self {
        Self {
            flag: flag.to_string(),
            gates: gates.iter().map(|g| g.to_string()).collect(),
        }
    }
}
