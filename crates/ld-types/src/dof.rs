//! Degrees of freedom: the named input dimensions an agent can steer or observe.

use serde::{Deserialize, Serialize};

use crate::errors::{LdError, LdResult};

/// The search range of a single degree of freedom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchDomain {
    /// Continuous interval [low, high].
    Continuous { low: f64, high: f64 },
    /// Finite set of numeric levels (e.g. filter thicknesses).
    Discrete { levels: Vec<f64> },
    /// Finite set of named levels.
    Categorical { levels: Vec<String> },
}

impl SearchDomain {
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Continuous { .. })
    }

    /// Number of distinct levels, `None` for continuous domains.
    pub fn level_count(&self) -> Option<usize> {
        match self {
            Self::Continuous { .. } => None,
            Self::Discrete { levels } => Some(levels.len()),
            Self::Categorical { levels } => Some(levels.len()),
        }
    }

    /// Whether a concrete value lies inside the domain.
    pub fn contains(&self, value: &DofValue) -> bool {
        match (self, value) {
            (Self::Continuous { low, high }, DofValue::Float(v)) => *v >= *low && *v <= *high,
            (Self::Discrete { levels }, DofValue::Float(v)) => {
                levels.iter().any(|l| (l - v).abs() < 1e-12)
            }
            (Self::Categorical { levels }, DofValue::Level(v)) => levels.iter().any(|l| l == v),
            _ => false,
        }
    }

    fn validate(&self, name: &str) -> LdResult<()> {
        match self {
            Self::Continuous { low, high } => {
                if !(low.is_finite() && high.is_finite()) {
                    return Err(crate::config_error!(
                        "DOF '{name}': bounds must be finite, got [{low}, {high}]"
                    ));
                }
                if low >= high {
                    return Err(crate::config_error!(
                        "DOF '{name}': lower bound {low} must be below upper bound {high}"
                    ));
                }
            }
            Self::Discrete { levels } => {
                if levels.is_empty() {
                    return Err(crate::config_error!("DOF '{name}': no discrete levels"));
                }
                if levels.iter().any(|l| !l.is_finite()) {
                    return Err(crate::config_error!("DOF '{name}': non-finite level"));
                }
                if levels.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(crate::config_error!(
                        "DOF '{name}': discrete levels must be strictly increasing"
                    ));
                }
            }
            Self::Categorical { levels } => {
                if levels.is_empty() {
                    return Err(crate::config_error!("DOF '{name}': no categorical levels"));
                }
            }
        }
        Ok(())
    }
}

/// A concrete value held by a degree of freedom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DofValue {
    Float(f64),
    Level(String),
}

impl DofValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Level(_) => None,
        }
    }
}

impl std::fmt::Display for DofValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Level(v) => write!(f, "{v}"),
        }
    }
}

/// A degree of freedom (DOF): one named input dimension of the process.
///
/// Active DOFs are optimized over; inactive DOFs are still read, recorded
/// and fed to the surrogate as fixed covariates. Read-only DOFs are never
/// written by the agent (their values arrive from an uncontrolled external
/// process) but are modeled as inputs all the same.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegreeOfFreedom {
    /// Unique key for this DOF across the agent.
    pub name: String,
    /// A longer human-readable description.
    pub description: String,
    pub search_domain: SearchDomain,
    /// If true, included in acquisition optimization. Toggleable between
    /// iterations without invalidating historical data.
    pub active: bool,
    /// If true, the agent never writes this DOF.
    pub read_only: bool,
    /// Units, for display and housekeeping only (e.g. "mm", "deg").
    pub units: String,
    /// Name of the external controllable/observable entity this DOF maps
    /// to. The core never calls into it; the execution collaborator does.
    pub device: Option<String>,
}

impl DegreeOfFreedom {
    pub fn continuous(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            search_domain: SearchDomain::Continuous { low, high },
            active: true,
            read_only: false,
            units: String::new(),
            device: None,
        }
    }

    pub fn discrete(name: impl Into<String>, levels: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            search_domain: SearchDomain::Discrete { levels },
            active: true,
            read_only: false,
            units: String::new(),
            device: None,
        }
    }

    pub fn categorical(name: impl Into<String>, levels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            search_domain: SearchDomain::Categorical { levels },
            active: true,
            read_only: false,
            units: String::new(),
            device: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Default value used before any data has been recorded: the domain
    /// midpoint for continuous DOFs, the first level otherwise.
    pub fn default_value(&self) -> DofValue {
        match &self.search_domain {
            SearchDomain::Continuous { low, high } => DofValue::Float(0.5 * (low + high)),
            SearchDomain::Discrete { levels } => DofValue::Float(levels[0]),
            SearchDomain::Categorical { levels } => DofValue::Level(levels[0].clone()),
        }
    }
}

/// A validated, ordered collection of DOFs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DofSet {
    dofs: Vec<DegreeOfFreedom>,
}

impl DofSet {
    pub fn new(dofs: Vec<DegreeOfFreedom>) -> LdResult<Self> {
        for dof in &dofs {
            if dof.name.is_empty() {
                return Err(crate::config_error!("DOF with empty name"));
            }
            dof.search_domain.validate(&dof.name)?;
        }
        for (i, dof) in dofs.iter().enumerate() {
            if dofs[..i].iter().any(|other| other.name == dof.name) {
                return Err(crate::config_error!("Duplicate DOF name: {}", dof.name));
            }
        }
        Ok(Self { dofs })
    }

    pub fn len(&self) -> usize {
        self.dofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dofs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DegreeOfFreedom> {
        self.dofs.iter()
    }

    pub fn get(&self, name: &str) -> Option<&DegreeOfFreedom> {
        self.dofs.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.dofs.iter().map(|d| d.name.as_str()).collect()
    }

    /// DOFs currently optimized over: active and not read-only.
    pub fn active(&self) -> Vec<&DegreeOfFreedom> {
        self.dofs
            .iter()
            .filter(|d| d.active && !d.read_only)
            .collect()
    }

    /// Toggle a DOF's `active` flag between iterations.
    pub fn set_active(&mut self, name: &str, active: bool) -> LdResult<()> {
        match self.dofs.iter_mut().find(|d| d.name == name) {
            Some(dof) => {
                dof.active = active;
                Ok(())
            }
            None => Err(LdError::Config(format!("No such DOF: {name}"))),
        }
    }
}
