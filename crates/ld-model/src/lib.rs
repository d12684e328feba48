//! # ld-model
//!
//! Probabilistic surrogate models for Lodestar: one Gaussian process per
//! objective, fit on the normalized data table, exposing predictive mean
//! and uncertainty at arbitrary query points.

pub mod gp;
pub mod kernel;
pub mod manager;
pub mod math;

pub use gp::{GpModel, Posterior};
pub use kernel::SquaredExponential;
pub use manager::{FittedModels, ModelManager, ObjectiveModel, MIN_VALID_RECORDS};
pub use math::{norm_cdf, norm_pdf};
