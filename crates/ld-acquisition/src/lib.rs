//! # ld-acquisition
//!
//! Acquisition criteria over the fitted surrogates, the inner global
//! optimizer that proposes candidate input vectors, low-discrepancy
//! fallback sampling, Pareto/hypervolume computation for multi-objective
//! trade-offs, and batch route planning.

pub mod acquisition;
pub mod optimize;
pub mod pareto;
pub mod qmc;
pub mod route;

pub use acquisition::{AcqParams, AcquisitionContext, AcquisitionKind};
pub use optimize::{optimize_batch, optimize_single, quasi_random_batch, DomainMap};
pub use pareto::{dominates, hypervolume, pareto_front_indices};
pub use qmc::HaltonSequence;
pub use route::{order, total_cost, MovementMetric};
