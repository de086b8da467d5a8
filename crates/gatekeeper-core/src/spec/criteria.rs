use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Priority;

/// Acceptance criteria for gates of one priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassingCriteria {
    /// Percentage in [0, 100].
    pub min_pass_rate: f64,
    pub allowed_failures: u32,
}

impl PassingCriteria {
    pub const STRICT: PassingCriteria = PassingCriteria {
        min_pass_rate: 100.0,
        allowed_failures: 0,
    };

    pub fn new(min_pass_rate: f64, allowed_failures: u32) -> Self {
        Self {
            min_pass_rate,
            allowed_failures,
        }
    }

    /// A gate passes iff both the rate and the failure budget hold.
    pub fn accepts(&self, pass_rate: f64, failures: usize) -> bool {
        pass_rate >= self.min_pass_rate && failures <= self.allowed_failures as usize
    }

    pub fn is_strict(&self) -> bool {
        self.min_pass_rate >= 100.0 && self.allowed_failures == 0
    }

    pub fn is_in_range(&self) -> bool {
        (0.0..=100.0).contains(&self.min_pass_rate)
    }

    fn default_for(priority: Priority) -> Self {
        match priority {
            Priority::Critical => Self::STRICT,
            Priority::High => Self::new(80.0, 1),
            Priority::Medium => Self::new(60.0, 2),
        }
    }
}

/// Criteria keyed by priority.
///
/// Deserializing fills tiers the document leaves out with defaults, so a
/// missing entry only arises from [`CriteriaTable::empty`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<Priority, PassingCriteria>",
    into = "BTreeMap<Priority, PassingCriteria>"
)]
pub struct CriteriaTable(BTreeMap<Priority, PassingCriteria>);

impl CriteriaTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, priority: Priority) -> Option<&PassingCriteria> {
        self.0.get(&priority)
    }

    pub fn insert(&mut self, priority: Priority, criteria: PassingCriteria) {
        self.0.insert(priority, criteria);
    }

    pub fn with(mut self, priority: Priority, criteria: PassingCriteria) -> Self {
        self.insert(priority, criteria);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Priority, &PassingCriteria)> {
        self.0.iter().map(|(p, c)| (*p, c))
    }
}

impl Default for CriteriaTable {
    fn default() -> Self {
        Self(
            Priority::ALL
                .iter()
                .map(|p| (*p, PassingCriteria::default_for(*p)))
                .collect(),
        )
    }
}

impl From<BTreeMap<Priority, PassingCriteria>> for CriteriaTable {
    fn from(explicit: BTreeMap<Priority, PassingCriteria>) -> Self {
        let mut table = Self::default();
        table.0.extend(explicit);
        table
    }
}

impl From<CriteriaTable> for BTreeMap<Priority, PassingCriteria> {
    fn from(table: CriteriaTable) -> Self {
        table.0
    }
}
