//! Derived normalized views over the data table.
//!
//! Snapshots are caches, not source of truth: they are rebuilt from the
//! table whenever it grows and are immutable once built, so model fitting
//! and acquisition never observe a partially appended record.
//!
//! This module is the single place where minimize-objectives are
//! sign-flipped. Everything downstream works in "score space": standardized
//! values where larger is always better.

use ld_types::{DegreeOfFreedom, DofSet, DofValue, LdResult, Objective, SearchDomain, Target};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::table::DataTable;

const MIN_STD: f64 = 1e-12;

/// Map a DOF value into the canonical unit interval.
///
/// Continuous domains rescale linearly; discrete and categorical domains
/// index-encode their levels and rescale the index. Out-of-domain
/// continuous values (read-only drift can exceed its limits) are clamped.
pub fn encode_unit(dof: &DegreeOfFreedom, value: &DofValue) -> LdResult<f64> {
    match (&dof.search_domain, value) {
        (SearchDomain::Continuous { low, high }, DofValue::Float(v)) => {
            Ok(((v - low) / (high - low)).clamp(0.0, 1.0))
        }
        (SearchDomain::Discrete { levels }, DofValue::Float(v)) => {
            let idx = levels
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    (*a - v)
                        .abs()
                        .partial_cmp(&(*b - v).abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            Ok(index_to_unit(idx, levels.len()))
        }
        (SearchDomain::Categorical { levels }, DofValue::Level(v)) => {
            match levels.iter().position(|l| l == v) {
                Some(idx) => Ok(index_to_unit(idx, levels.len())),
                None => Err(ld_types::schema_error!(
                    "DOF '{}': unknown level '{v}'",
                    dof.name
                )),
            }
        }
        _ => Err(ld_types::schema_error!(
            "DOF '{}': value {value} does not match its domain kind",
            dof.name
        )),
    }
}

/// Map a unit-interval coordinate back to a domain value, snapping discrete
/// and categorical coordinates to the nearest valid level.
pub fn decode_unit(dof: &DegreeOfFreedom, unit: f64) -> DofValue {
    let unit = unit.clamp(0.0, 1.0);
    match &dof.search_domain {
        SearchDomain::Continuous { low, high } => DofValue::Float(low + unit * (high - low)),
        SearchDomain::Discrete { levels } => DofValue::Float(levels[unit_to_index(unit, levels.len())]),
        SearchDomain::Categorical { levels } => {
            DofValue::Level(levels[unit_to_index(unit, levels.len())].clone())
        }
    }
}

fn index_to_unit(idx: usize, count: usize) -> f64 {
    if count <= 1 {
        0.5
    } else {
        idx as f64 / (count - 1) as f64
    }
}

fn unit_to_index(unit: f64, count: usize) -> usize {
    if count <= 1 {
        0
    } else {
        ((unit * (count - 1) as f64).round() as usize).min(count - 1)
    }
}

/// Affine map between raw objective values and score space.
///
/// score = sign * (raw - mean) / std, with sign = -1 for minimize targets
/// and +1 otherwise. Applied here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputTransform {
    pub mean: f64,
    pub std: f64,
    pub sign: f64,
}

impl OutputTransform {
    pub fn score(&self, raw: f64) -> f64 {
        self.sign * (raw - self.mean) / self.std
    }

    pub fn raw(&self, score: f64) -> f64 {
        self.mean + self.sign * score * self.std
    }

    /// Scale factor from score-space sigma to raw-space sigma.
    pub fn raw_sigma(&self, score_sigma: f64) -> f64 {
        score_sigma * self.std
    }
}

/// One objective's standardized column in a snapshot.
#[derive(Debug, Clone)]
pub struct ScoreColumn {
    /// Per-record score, `None` where the observation is missing/invalid.
    pub scores: Vec<Option<f64>>,
    pub transform: OutputTransform,
}

/// An immutable normalized view of the table at a point in time.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    len: usize,
    dof_names: Vec<String>,
    x: Array2<f64>,
    columns: HashMap<String, ScoreColumn>,
    feasible: Vec<bool>,
}

impl TableSnapshot {
    /// Build the normalized input matrix and standardized score columns
    /// from the current table contents.
    pub fn build(table: &DataTable, dofs: &DofSet, objectives: &[Objective]) -> LdResult<Self> {
        let n = table.len();
        let d = dofs.len();
        let mut x = Array2::zeros((n, d));
        for (i, record) in table.records().iter().enumerate() {
            for (j, dof) in dofs.iter().enumerate() {
                // append() guarantees the key exists
                let value = record
                    .inputs
                    .get(&dof.name)
                    .ok_or_else(|| ld_types::schema_error!("record missing '{}'", dof.name))?;
                x[[i, j]] = encode_unit(dof, value)?;
            }
        }

        let mut columns = HashMap::new();
        for objective in objectives {
            let raw: Vec<Option<f64>> = table
                .records()
                .iter()
                .map(|r| r.outcomes.get(&objective.name).copied().flatten())
                .map(|v| v.filter(|v| v.is_finite()))
                .collect();
            let valid: Vec<f64> = raw.iter().filter_map(|v| *v).collect();
            let mean = if valid.is_empty() {
                0.0
            } else {
                valid.iter().sum::<f64>() / valid.len() as f64
            };
            let var = if valid.len() > 1 {
                valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (valid.len() - 1) as f64
            } else {
                0.0
            };
            // Degenerate spread (0 or 1 valid points, or identical values)
            // falls back to the identity scale.
            let std = if var.sqrt() < MIN_STD { 1.0 } else { var.sqrt() };
            let sign = match objective.target {
                Target::Minimize => -1.0,
                _ => 1.0,
            };
            let transform = OutputTransform { mean, std, sign };
            let scores = raw.iter().map(|v| v.map(|v| transform.score(v))).collect();
            columns.insert(objective.name.clone(), ScoreColumn { scores, transform });
        }

        // A record is feasible when every range objective has a valid,
        // in-range observation. Missing constraint values cannot be
        // verified and count as infeasible.
        let feasible = table
            .records()
            .iter()
            .map(|r| {
                objectives.iter().filter(|o| o.is_constraint()).all(|o| {
                    matches!(
                        r.outcomes.get(&o.name).copied().flatten(),
                        Some(v) if o.is_feasible(v)
                    )
                })
            })
            .collect();

        Ok(Self {
            len: n,
            dof_names: dofs.iter().map(|d| d.name.clone()).collect(),
            x,
            columns,
            feasible,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dof_names(&self) -> &[String] {
        &self.dof_names
    }

    pub fn dim(&self) -> usize {
        self.x.ncols()
    }

    /// The normalized input matrix, one row per record.
    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.x.row(i)
    }

    pub fn column(&self, objective: &str) -> Option<&ScoreColumn> {
        self.columns.get(objective)
    }

    pub fn is_feasible(&self, i: usize) -> bool {
        self.feasible[i]
    }

    /// Count of records with a usable value for the named objective.
    pub fn valid_count(&self, objective: &str) -> usize {
        self.columns
            .get(objective)
            .map(|c| c.scores.iter().filter(|s| s.is_some()).count())
            .unwrap_or(0)
    }

    /// Rows usable for fitting the named objective: (inputs, score) pairs.
    pub fn training_rows(&self, objective: &str) -> (Array2<f64>, Array1<f64>) {
        let column = match self.columns.get(objective) {
            Some(c) => c,
            None => return (Array2::zeros((0, self.dim())), Array1::zeros(0)),
        };
        let idx: Vec<usize> = column
            .scores
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|_| i))
            .collect();
        let mut x = Array2::zeros((idx.len(), self.dim()));
        let mut y = Array1::zeros(idx.len());
        for (k, &i) in idx.iter().enumerate() {
            x.row_mut(k).assign(&self.x.row(i));
            y[k] = column.scores[i].unwrap_or(0.0);
        }
        (x, y)
    }

    /// Best (feasible, valid) score observed so far for an objective.
    pub fn best_score(&self, objective: &str) -> Option<f64> {
        let column = self.columns.get(objective)?;
        column
            .scores
            .iter()
            .enumerate()
            .filter(|(i, _)| self.feasible[*i])
            .filter_map(|(_, s)| *s)
            .fold(None, |best, s| match best {
                Some(b) if b >= s => Some(b),
                _ => Some(s),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Record;
    use ld_types::DegreeOfFreedom;

    fn setup() -> (DofSet, Vec<Objective>, DataTable) {
        let dofs = DofSet::new(vec![
            DegreeOfFreedom::continuous("x1", -6.0, 6.0),
            DegreeOfFreedom::categorical("anode", vec!["Cu".into(), "Mo".into(), "W".into()]),
        ])
        .unwrap();
        let objectives = vec![
            Objective::minimize("fwhm"),
            Objective::in_range("flux", 10.0, f64::INFINITY),
        ];
        let table = DataTable::new(&dofs, &objectives);
        (dofs, objectives, table)
    }

    fn record(x1: f64, anode: &str, fwhm: Option<f64>, flux: Option<f64>) -> Record {
        let mut inputs = HashMap::new();
        inputs.insert("x1".to_string(), DofValue::Float(x1));
        inputs.insert("anode".to_string(), DofValue::Level(anode.to_string()));
        let mut outcomes = HashMap::new();
        outcomes.insert("fwhm".to_string(), fwhm);
        outcomes.insert("flux".to_string(), flux);
        Record::new(inputs, outcomes)
    }

    #[test]
    fn unit_encoding_roundtrip() {
        let dof = DegreeOfFreedom::continuous("x", -6.0, 6.0);
        let unit = encode_unit(&dof, &DofValue::Float(0.0)).unwrap();
        assert!((unit - 0.5).abs() < 1e-12);
        assert_eq!(decode_unit(&dof, 1.0), DofValue::Float(6.0));

        let cat = DegreeOfFreedom::categorical("anode", vec!["Cu".into(), "Mo".into(), "W".into()]);
        assert_eq!(encode_unit(&cat, &DofValue::Level("Mo".into())).unwrap(), 0.5);
        assert_eq!(decode_unit(&cat, 0.45), DofValue::Level("Mo".into()));

        let disc = DegreeOfFreedom::discrete("att", vec![0.0, 1.0, 4.0]);
        assert_eq!(decode_unit(&disc, 0.9), DofValue::Float(4.0));
    }

    #[test]
    fn minimize_sign_flip_is_applied_once() {
        let (dofs, objectives, mut table) = setup();
        table.append(record(0.0, "Cu", Some(1.0), Some(20.0))).unwrap();
        table.append(record(1.0, "Mo", Some(3.0), Some(20.0))).unwrap();
        let snapshot = TableSnapshot::build(&table, &dofs, &objectives).unwrap();

        let column = snapshot.column("fwhm").unwrap();
        // Smaller fwhm must map to the larger score.
        assert!(column.scores[0].unwrap() > column.scores[1].unwrap());
        // Round trip back to raw units.
        let raw = column.transform.raw(column.scores[1].unwrap());
        assert!((raw - 3.0).abs() < 1e-9);
    }

    #[test]
    fn feasibility_filtering() {
        let (dofs, objectives, mut table) = setup();
        table.append(record(0.0, "Cu", Some(1.0), Some(20.0))).unwrap();
        table.append(record(1.0, "Cu", Some(0.5), Some(5.0))).unwrap(); // flux too low
        table.append(record(2.0, "Cu", Some(2.0), None)).unwrap(); // flux unknown
        let snapshot = TableSnapshot::build(&table, &dofs, &objectives).unwrap();

        assert!(snapshot.is_feasible(0));
        assert!(!snapshot.is_feasible(1));
        assert!(!snapshot.is_feasible(2));
        // Best feasible fwhm score comes from record 0 even though record 1
        // has the smaller raw value.
        let best = snapshot.best_score("fwhm").unwrap();
        let column = snapshot.column("fwhm").unwrap();
        assert_eq!(best, column.scores[0].unwrap());
    }

    #[test]
    fn training_rows_skip_missing() {
        let (dofs, objectives, mut table) = setup();
        table.append(record(0.0, "Cu", Some(1.0), Some(20.0))).unwrap();
        table.append(record(1.0, "Mo", None, Some(20.0))).unwrap();
        table.append(record(2.0, "W", Some(2.0), Some(20.0))).unwrap();
        let snapshot = TableSnapshot::build(&table, &dofs, &objectives).unwrap();

        let (x, y) = snapshot.training_rows("fwhm");
        assert_eq!(x.nrows(), 2);
        assert_eq!(y.len(), 2);
    }
}
