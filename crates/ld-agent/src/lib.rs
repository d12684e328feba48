//! # ld-agent
//!
//! The ask/tell active-learning loop: proposal of candidate input
//! configurations, execution and digestion boundaries, observation
//! recording, and the full learn cycle tying them together.

pub mod agent;
pub mod execution;
pub mod sim;

pub use agent::{Agent, AgentBuilder, IterationOutcome, LearnReport, LoopState, Observation, Proposal};
pub use execution::{Digester, Executor, FnDigester, RawMeasurement};
pub use sim::{BrownianDrift, SimulatedBeamline};
