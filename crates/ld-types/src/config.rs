//! Agent configuration surface.

use serde::{Deserialize, Serialize};

/// Top-level configuration for an agent.
///
/// The acquisition strategy is selected by string key ("expected-improvement",
/// "upper-confidence-bound", "hypervolume-improvement", "quasi-random") so
/// callers can wire it from external config without depending on engine types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default acquisition strategy key used by learn().
    pub acquisition: String,

    /// How many candidate points to propose per iteration.
    pub batch_size: usize,

    /// Reorder proposed batches to minimize movement cost.
    pub route: bool,

    /// When true, a failed Proposing step falls back to quasi-random
    /// sampling and the loop continues; when false, learn() aborts.
    pub tolerate_acquisition_errors: bool,

    /// Caller-supplied timeout for external execution, in seconds.
    /// `None` waits indefinitely.
    pub execution_timeout_secs: Option<u64>,

    /// Restarts of the inner acquisition optimizer.
    pub optimizer_restarts: usize,

    /// Monte-Carlo samples for hypervolume-improvement estimates.
    pub hypervolume_samples: usize,

    /// Exploration coefficient for the upper-confidence-bound strategy.
    pub ucb_beta: f64,

    /// Seed for all stochastic components. `None` uses a fixed default.
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            acquisition: "expected-improvement".to_string(),
            batch_size: 1,
            route: true,
            tolerate_acquisition_errors: false,
            execution_timeout_secs: None,
            optimizer_restarts: 16,
            hypervolume_samples: 256,
            ucb_beta: 2.0,
            seed: None,
        }
    }
}

impl AgentConfig {
    pub fn with_acquisition(mut self, key: &str) -> Self {
        self.acquisition = key.to_string();
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_route(mut self, route: bool) -> Self {
        self.route = route;
        self
    }

    pub fn tolerate_acquisition_errors(mut self, tolerate: bool) -> Self {
        self.tolerate_acquisition_errors = tolerate;
        self
    }

    pub fn with_execution_timeout_secs(mut self, secs: u64) -> Self {
        self.execution_timeout_secs = Some(secs);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
