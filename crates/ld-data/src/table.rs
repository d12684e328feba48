//! The append-only record of tried inputs and observed outcomes.

use chrono::{DateTime, Utc};
use ld_types::{schema_error, DofSet, DofValue, LdResult, Objective};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One (input vector, outcome vector) observation.
///
/// Outcomes map every objective name to `Some(value)` or `None` for a
/// missing/invalid evaluation. Missing values are represented explicitly,
/// never dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    /// Acquisition batch this record came from, if any. Externally told
    /// data has no batch.
    pub batch_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
    pub inputs: HashMap<String, DofValue>,
    pub outcomes: HashMap<String, Option<f64>>,
}

impl Record {
    pub fn new(
        inputs: HashMap<String, DofValue>,
        outcomes: HashMap<String, Option<f64>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id: None,
            recorded_at: Utc::now(),
            inputs,
            outcomes,
        }
    }

    pub fn with_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Whether this record carries a usable value for the named objective.
    pub fn is_valid_for(&self, objective: &str) -> bool {
        matches!(self.outcomes.get(objective), Some(Some(v)) if v.is_finite())
    }
}

/// The agent's lifetime table of observations. Append-only: records are
/// never mutated, deduplicated or deleted, and their order is the ground
/// truth for model refitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTable {
    dof_names: Vec<String>,
    objective_names: Vec<String>,
    records: Vec<Record>,
}

impl DataTable {
    pub fn new(dofs: &DofSet, objectives: &[Objective]) -> Self {
        Self {
            dof_names: dofs.iter().map(|d| d.name.clone()).collect(),
            objective_names: objectives.iter().map(|o| o.name.clone()).collect(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn dof_names(&self) -> &[String] {
        &self.dof_names
    }

    pub fn objective_names(&self) -> &[String] {
        &self.objective_names
    }

    /// Append one record after schema validation. NaN outcomes are coerced
    /// to missing; the record itself is stored verbatim otherwise.
    pub fn append(&mut self, mut record: Record) -> LdResult<()> {
        for name in &self.dof_names {
            if !record.inputs.contains_key(name) {
                return Err(schema_error!("record {} missing input '{name}'", record.id));
            }
        }
        for name in record.inputs.keys() {
            if !self.dof_names.iter().any(|n| n == name) {
                return Err(schema_error!("record {} has unknown input '{name}'", record.id));
            }
        }
        for name in &self.objective_names {
            if !record.outcomes.contains_key(name) {
                return Err(schema_error!(
                    "record {} missing outcome '{name}'",
                    record.id
                ));
            }
        }
        for name in record.outcomes.keys() {
            if !self.objective_names.iter().any(|n| n == name) {
                return Err(schema_error!(
                    "record {} has unknown outcome '{name}'",
                    record.id
                ));
            }
        }
        for value in record.outcomes.values_mut() {
            if matches!(value, Some(v) if !v.is_finite()) {
                *value = None;
            }
        }
        self.records.push(record);
        Ok(())
    }

    /// Number of records with a usable value for the named objective.
    pub fn valid_count(&self, objective: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.is_valid_for(objective))
            .count()
    }

    /// The most recently recorded value of a DOF, if any record exists.
    pub fn last_input(&self, dof: &str) -> Option<&DofValue> {
        self.records.iter().rev().find_map(|r| r.inputs.get(dof))
    }
}
