//! # ld-data
//!
//! The append-only experiment table accumulated over an agent's lifetime,
//! the normalized snapshot views that model fitting and acquisition read,
//! and the persistence boundary.

pub mod persistence;
pub mod table;
pub mod views;

pub use persistence::{JsonlStore, RecordStore};
pub use table::{DataTable, Record};
pub use views::{decode_unit, encode_unit, OutputTransform, ScoreColumn, TableSnapshot};
