//! Objectives: the named measured quantities the agent extremizes or constrains.

use serde::{Deserialize, Serialize};

/// What the agent wants from an objective's value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Minimize,
    Maximize,
    /// Satisfied when the observed value lies in [low, high]. Treated as a
    /// feasibility constraint, not a fitness. Open bounds (±infinity) make
    /// it one-sided.
    Range { low: f64, high: f64 },
}

impl Default for Target {
    fn default() -> Self {
        Self::Maximize
    }
}

/// A named measured/derived quantity, matching a column the digestion
/// function is expected to populate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// Unique key, disjoint from all DOF names.
    pub name: String,
    pub description: String,
    pub target: Target,
    /// Scalarization weight for multi-objective combination.
    pub weight: f64,
    /// Reference value for hypervolume computations. When unset, the
    /// empirical worst valid value stands in.
    pub threshold: Option<f64>,
    pub units: String,
}

impl Objective {
    pub fn new(name: impl Into<String>, target: Target) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            target,
            weight: 1.0,
            threshold: None,
            units: String::new(),
        }
    }

    pub fn minimize(name: impl Into<String>) -> Self {
        Self::new(name, Target::Minimize)
    }

    pub fn maximize(name: impl Into<String>) -> Self {
        Self::new(name, Target::Maximize)
    }

    pub fn in_range(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self::new(name, Target::Range { low, high })
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Range objectives gate feasibility instead of being extremized.
    pub fn is_constraint(&self) -> bool {
        matches!(self.target, Target::Range { .. })
    }

    pub fn is_extremized(&self) -> bool {
        !self.is_constraint()
    }

    /// Whether a raw observed value satisfies a range target. Always true
    /// for extremized objectives.
    pub fn is_feasible(&self, value: f64) -> bool {
        match self.target {
            Target::Range { low, high } => value >= low && value <= high,
            _ => true,
        }
    }
}
