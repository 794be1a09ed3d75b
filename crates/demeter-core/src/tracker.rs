//! Per-application failure tracking.
//!
//! Every failed grouping call bumps the application's failure count. Once
//! the count goes strictly above the threshold the application is
//! suppressed for the rest of the process lifetime. Successes never reset
//! or decrement a count.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Failures tolerated before suppression when nothing is configured
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// What a recorded failure did to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Counted; still below or at the threshold
    Warned { failures: u32 },
    /// This failure crossed the threshold
    Suppressed { failures: u32 },
    /// The application was suppressed earlier
    AlreadySuppressed { failures: u32 },
}

impl FailureOutcome {
    #[must_use]
    pub fn failures(self) -> u32 {
        match self {
            Self::Warned { failures }
            | Self::Suppressed { failures }
            | Self::AlreadySuppressed { failures } => failures,
        }
    }

    #[must_use]
    pub fn newly_suppressed(self) -> bool {
        matches!(self, Self::Suppressed { .. })
    }
}

/// Warning registry plus suppression set
#[derive(Debug, Clone)]
pub struct FailureTracker {
    threshold: u32,
    warnings: HashMap<String, u32>,
    suppressed: HashSet<String>,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl FailureTracker {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            warnings: HashMap::new(),
            suppressed: HashSet::new(),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Count one failure for `name`, suppressing it once the count exceeds
    /// the threshold.
    pub fn record_failure(&mut self, name: &str) -> FailureOutcome {
        let count = self.warnings.entry(name.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        let failures = *count;

        if self.suppressed.contains(name) {
            FailureOutcome::AlreadySuppressed { failures }
        } else if failures > self.threshold {
            self.suppressed.insert(name.to_string());
            FailureOutcome::Suppressed { failures }
        } else {
            FailureOutcome::Warned { failures }
        }
    }

    #[must_use]
    pub fn is_suppressed(&self, name: &str) -> bool {
        self.suppressed.contains(name)
    }

    /// Failures recorded so far (0 when never failed)
    #[must_use]
    pub fn failure_count(&self, name: &str) -> u32 {
        self.warnings.get(name).copied().unwrap_or(0)
    }

    /// Whether `name` has any entry in the warning registry
    #[must_use]
    pub fn is_tracked(&self, name: &str) -> bool {
        self.warnings.contains_key(name)
    }

    #[must_use]
    pub fn suppressed_count(&self) -> usize {
        self.suppressed.len()
    }

    /// Sorted, serializable view of the current state
    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        let mut suppressed: Vec<String> = self.suppressed.iter().cloned().collect();
        suppressed.sort();
        TrackerSnapshot {
            threshold: self.threshold,
            warnings: self
                .warnings
                .iter()
                .map(|(name, count)| (name.clone(), *count))
                .collect(),
            suppressed,
        }
    }
}

/// Point-in-time copy of the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub threshold: u32,
    pub warnings: BTreeMap<String, u32>,
    pub suppressed: Vec<String>,
}
