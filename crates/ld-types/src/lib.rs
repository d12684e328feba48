pub mod config;
pub mod dof;
pub mod errors;
pub mod objective;

pub use config::*;
pub use dof::*;
pub use errors::*;
pub use objective::*;
