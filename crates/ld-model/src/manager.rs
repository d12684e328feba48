//! The surrogate model manager: fits one GP per objective from a table
//! snapshot and serves predictions from an atomically swapped bundle.

use ld_data::{OutputTransform, TableSnapshot};
use ld_types::{LdError, LdResult, Objective};
use ndarray::ArrayView1;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::gp::{GpModel, Posterior};

/// Variance estimation needs more than one point.
pub const MIN_VALID_RECORDS: usize = 2;

/// A fitted surrogate for one objective, with the transform needed to map
/// score-space posteriors back to raw units.
#[derive(Debug, Clone)]
pub struct ObjectiveModel {
    pub gp: GpModel,
    pub transform: OutputTransform,
}

impl ObjectiveModel {
    /// Posterior in score space (standardized, maximize-oriented).
    pub fn predict(&self, query: ArrayView1<'_, f64>) -> Posterior {
        self.gp.predict(query)
    }

    /// Posterior in the objective's raw units.
    pub fn predict_raw(&self, query: ArrayView1<'_, f64>) -> Posterior {
        let p = self.gp.predict(query);
        Posterior {
            mean: self.transform.raw(p.mean),
            sigma: self.transform.raw_sigma(p.sigma),
        }
    }
}

/// An immutable bundle of fitted models, tagged with the table length it
/// was trained on so staleness is detectable.
#[derive(Debug, Clone)]
pub struct FittedModels {
    trained_len: usize,
    models: HashMap<String, ObjectiveModel>,
}

impl FittedModels {
    pub fn trained_len(&self) -> usize {
        self.trained_len
    }

    pub fn get(&self, objective: &str) -> Option<&ObjectiveModel> {
        self.models.get(objective)
    }

    pub fn objective_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(|s| s.as_str())
    }
}

/// Owns the per-objective surrogates. Replacement of fitted state is
/// atomic: a concurrent reader sees the old bundle or the new one, never a
/// partially updated mix.
#[derive(Debug, Default)]
pub struct ModelManager {
    fitted: RwLock<Option<Arc<FittedModels>>>,
}

impl ModelManager {
    pub fn new() -> Self {
        Self {
            fitted: RwLock::new(None),
        }
    }

    /// Fit one model per objective from the snapshot. Per-objective fits
    /// are independent and run in parallel. Fails with `InsufficientData`
    /// before touching any numerics if any objective has too few valid
    /// records; the previously fitted bundle is left in place on failure.
    pub fn fit(
        &self,
        snapshot: &TableSnapshot,
        objectives: &[Objective],
    ) -> LdResult<Arc<FittedModels>> {
        let have = objectives
            .iter()
            .map(|o| snapshot.valid_count(&o.name))
            .min()
            .unwrap_or(0);
        if have < MIN_VALID_RECORDS {
            return Err(LdError::InsufficientData {
                have,
                need: MIN_VALID_RECORDS,
            });
        }

        let fitted: Vec<(String, ObjectiveModel)> = objectives
            .par_iter()
            .map(|objective| {
                let (x, y) = snapshot.training_rows(&objective.name);
                let gp = GpModel::fit_auto(&objective.name, x, y)?;
                let transform = snapshot
                    .column(&objective.name)
                    .map(|c| c.transform)
                    .ok_or_else(|| {
                        ld_types::schema_error!("no snapshot column for '{}'", objective.name)
                    })?;
                debug!(
                    objective = objective.name.as_str(),
                    points = gp.len(),
                    "fitted surrogate"
                );
                Ok((objective.name.clone(), ObjectiveModel { gp, transform }))
            })
            .collect::<LdResult<_>>()?;

        let bundle = Arc::new(FittedModels {
            trained_len: snapshot.len(),
            models: fitted.into_iter().collect(),
        });
        *self.fitted.write() = Some(bundle.clone());
        info!(
            records = snapshot.len(),
            objectives = objectives.len(),
            "surrogates refit"
        );
        Ok(bundle)
    }

    /// The current fitted bundle regardless of freshness.
    pub fn current(&self) -> Option<Arc<FittedModels>> {
        self.fitted.read().clone()
    }

    /// The fitted bundle, only if it was trained on this exact snapshot
    /// length. Stale bundles must never drive acquisition.
    pub fn fresh(&self, snapshot: &TableSnapshot) -> Option<Arc<FittedModels>> {
        self.current()
            .filter(|bundle| bundle.trained_len() == snapshot.len())
    }

    /// Fit only when the current bundle is stale or absent.
    pub fn ensure_fresh(
        &self,
        snapshot: &TableSnapshot,
        objectives: &[Objective],
    ) -> LdResult<Arc<FittedModels>> {
        if let Some(bundle) = self.fresh(snapshot) {
            return Ok(bundle);
        }
        self.fit(snapshot, objectives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ld_data::{DataTable, Record};
    use ld_types::{DegreeOfFreedom, DofSet, DofValue};
    use ndarray::array;
    use std::collections::HashMap;

    fn quadratic_setup(n: usize) -> (DofSet, Vec<Objective>, DataTable) {
        let dofs = DofSet::new(vec![DegreeOfFreedom::continuous("x", -2.0, 2.0)]).unwrap();
        let objectives = vec![Objective::minimize("f")];
        let mut table = DataTable::new(&dofs, &objectives);
        for i in 0..n {
            let x = -2.0 + 4.0 * i as f64 / (n.max(2) - 1) as f64;
            let mut inputs = HashMap::new();
            inputs.insert("x".to_string(), DofValue::Float(x));
            let mut outcomes = HashMap::new();
            outcomes.insert("f".to_string(), Some(x * x));
            table.append(Record::new(inputs, outcomes)).unwrap();
        }
        (dofs, objectives, table)
    }

    #[test]
    fn insufficient_data_is_surfaced() {
        let (dofs, objectives, table) = quadratic_setup(1);
        let snapshot = TableSnapshot::build(&table, &dofs, &objectives).unwrap();
        let manager = ModelManager::new();
        match manager.fit(&snapshot, &objectives) {
            Err(LdError::InsufficientData { have: 1, need: 2 }) => {}
            other => panic!("expected InsufficientData, got {other:?}"),
        }
        assert!(manager.current().is_none());
    }

    #[test]
    fn fit_and_predict_raw_units() {
        let (dofs, objectives, table) = quadratic_setup(9);
        let snapshot = TableSnapshot::build(&table, &dofs, &objectives).unwrap();
        let manager = ModelManager::new();
        let bundle = manager.fit(&snapshot, &objectives).unwrap();

        let model = bundle.get("f").unwrap();
        // x = 0 normalizes to 0.5; f(0) = 0 is the minimum.
        let center = model.predict_raw(array![0.5].view());
        let edge = model.predict_raw(array![0.0].view());
        assert!(center.mean < edge.mean);
        assert!(center.mean < 1.0);
    }

    #[test]
    fn staleness_tracking() {
        let (dofs, objectives, mut table) = quadratic_setup(5);
        let snapshot = TableSnapshot::build(&table, &dofs, &objectives).unwrap();
        let manager = ModelManager::new();
        manager.fit(&snapshot, &objectives).unwrap();
        assert!(manager.fresh(&snapshot).is_some());

        let mut inputs = HashMap::new();
        inputs.insert("x".to_string(), DofValue::Float(1.5));
        let mut outcomes = HashMap::new();
        outcomes.insert("f".to_string(), Some(2.25));
        table.append(Record::new(inputs, outcomes)).unwrap();
        let grown = TableSnapshot::build(&table, &dofs, &objectives).unwrap();

        // Old bundle is stale against the grown table.
        assert!(manager.fresh(&grown).is_none());
        let refit = manager.ensure_fresh(&grown, &objectives).unwrap();
        assert_eq!(refit.trained_len(), 6);
        assert!(manager.fresh(&grown).is_some());
    }

    #[test]
    fn failed_refit_keeps_previous_bundle() {
        let (dofs, objectives, table) = quadratic_setup(5);
        let snapshot = TableSnapshot::build(&table, &dofs, &objectives).unwrap();
        let manager = ModelManager::new();
        let bundle = manager.fit(&snapshot, &objectives).unwrap();

        // An empty snapshot cannot be fit, but the old bundle survives.
        let empty_table = DataTable::new(&dofs, &objectives);
        let empty = TableSnapshot::build(&empty_table, &dofs, &objectives).unwrap();
        assert!(manager.fit(&empty, &objectives).is_err());
        let current = manager.current().unwrap();
        assert_eq!(current.trained_len(), bundle.trained_len());
    }
}
