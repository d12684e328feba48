//! External collaborator boundaries: execution and digestion.
//!
//! The core never talks to devices directly. It hands a batch of input
//! configurations to an [`Executor`], waits (with an optional timeout) for
//! raw measurement records, and turns them into named objective values
//! through a [`Digester`]. Both are narrow trait contracts checked for
//! schema compliance at the boundary.

use async_trait::async_trait;
use ld_types::{DofValue, LdResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One raw measurement returned by the execution collaborator for one
/// proposed point: a name-indexed value map plus a success flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurement {
    pub values: HashMap<String, f64>,
    pub ok: bool,
    pub error: Option<String>,
}

impl RawMeasurement {
    pub fn success(values: HashMap<String, f64>) -> Self {
        Self {
            values,
            ok: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            values: HashMap::new(),
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Runs device motions and measurement triggers for a batch of proposed
/// input configurations. May be long-running (physical motion, exposure
/// time); the agent wraps the call in a caller-supplied timeout and records
/// timeouts as invalid data. Retry policy, if any, lives behind this trait,
/// never in the core.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute each point in order, returning one measurement per point.
    async fn execute(
        &self,
        batch: &[HashMap<String, DofValue>],
        position: &HashMap<String, DofValue>,
    ) -> LdResult<Vec<RawMeasurement>>;
}

/// Turns raw measurement records into named objective values.
///
/// Must populate only declared objective names (the agent rejects unknown
/// names as a schema mismatch); names it omits and NaN entries are treated
/// as invalid values for that point, not as errors. Must not mutate input
/// DOF values.
pub trait Digester: Send + Sync {
    fn digest(&self, raw: &[RawMeasurement]) -> LdResult<Vec<HashMap<String, Option<f64>>>>;
}

/// Adapter for plain per-measurement digestion functions.
pub struct FnDigester<F>(pub F);

impl<F> Digester for FnDigester<F>
where
    F: Fn(&RawMeasurement) -> HashMap<String, Option<f64>> + Send + Sync,
{
    fn digest(&self, raw: &[RawMeasurement]) -> LdResult<Vec<HashMap<String, Option<f64>>>> {
        Ok(raw.iter().map(&self.0).collect())
    }
}
