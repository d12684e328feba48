use thiserror::Error;

/// Main error type for the Lodestar system
#[derive(Error, Debug)]
pub enum LdError {
    /// Fewer valid records than the surrogate needs. Recoverable: callers
    /// fall back to quasi-random sampling.
    #[error("Insufficient data: have {have} valid records, need at least {need}")]
    InsufficientData { have: usize, need: usize },

    /// Numerical model fitting did not converge after the jitter-retry budget.
    #[error("Degenerate fit for objective '{objective}' after {attempts} attempts: {message}")]
    DegenerateFit {
        objective: String,
        attempts: usize,
        message: String,
    },

    /// The inner acquisition optimizer found no finite-valued candidate.
    #[error("Acquisition optimization failed after {restarts} restarts: {message}")]
    OptimizationFailed { restarts: usize, message: String },

    /// No active degree of freedom to optimize over. Misconfiguration.
    #[error("Empty domain: no active degrees of freedom")]
    EmptyDomain,

    /// External execution exceeded the caller-supplied timeout.
    #[error("Execution timed out after {timeout_secs} seconds")]
    ExecutionTimeout { timeout_secs: u64 },

    /// External execution reported failure.
    #[error("Execution failed: {message}")]
    ExecutionFailure { message: String },

    /// Digestion output does not match the declared objective schema.
    #[error("Digestion error: {message}")]
    Digestion { message: String },

    /// A record or table does not cover the declared DOF/objective names.
    #[error("Schema error: {message}")]
    Schema { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LdError {
    /// Whether the error is contained within one iteration (recorded as
    /// invalid data when tolerance is configured) rather than structural.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. }
                | Self::DegenerateFit { .. }
                | Self::OptimizationFailed { .. }
                | Self::ExecutionTimeout { .. }
                | Self::ExecutionFailure { .. }
        )
    }
}

/// Result type alias for Lodestar operations
pub type LdResult<T> = Result<T, LdError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::LdError::Config(format!($($arg)*))
    };
}

/// Macro for creating schema errors
#[macro_export]
macro_rules! schema_error {
    ($($arg:tt)*) => {
        $crate::LdError::Schema { message: format!($($arg)*) }
    };
}
