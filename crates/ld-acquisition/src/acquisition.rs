//! Acquisition criteria built on the fitted surrogates.
//!
//! Everything here works in score space: standardized, maximize-oriented
//! values produced by the snapshot layer. Range objectives never appear as
//! fitness terms; they gate the criterion through a feasibility probability
//! so infeasible regions get near-zero (never negative) acquisition mass.

use ld_data::TableSnapshot;
use ld_model::{norm_cdf, norm_pdf, FittedModels, ObjectiveModel};
use ld_types::{config_error, LdResult, Objective, Target};
use ndarray::ArrayView1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

use crate::pareto::{hypervolume, pareto_front_indices};

/// Acquisition strategy, selected by string key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionKind {
    ExpectedImprovement,
    UpperConfidenceBound,
    HypervolumeImprovement,
    QuasiRandom,
}

impl AcquisitionKind {
    pub fn parse(key: &str) -> LdResult<Self> {
        match key {
            "expected-improvement" | "ei" => Ok(Self::ExpectedImprovement),
            "upper-confidence-bound" | "ucb" => Ok(Self::UpperConfidenceBound),
            "hypervolume-improvement" | "ehvi" => Ok(Self::HypervolumeImprovement),
            "quasi-random" | "qr" => Ok(Self::QuasiRandom),
            other => Err(config_error!("Unknown acquisition kind: {other}")),
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::ExpectedImprovement => "expected-improvement",
            Self::UpperConfidenceBound => "upper-confidence-bound",
            Self::HypervolumeImprovement => "hypervolume-improvement",
            Self::QuasiRandom => "quasi-random",
        }
    }
}

/// Tuning knobs shared by the criteria.
#[derive(Debug, Clone, Copy)]
pub struct AcqParams {
    pub ucb_beta: f64,
    pub hv_samples: usize,
    pub seed: u64,
}

impl Default for AcqParams {
    fn default() -> Self {
        Self {
            ucb_beta: 2.0,
            hv_samples: 256,
            seed: 0,
        }
    }
}

/// A self-contained scoring context over one snapshot.
///
/// Owns clones of the fitted models so it can be conditioned on fantasized
/// observations during batch selection without touching the manager's
/// shared state.
#[derive(Debug, Clone)]
pub struct AcquisitionContext {
    kind: AcquisitionKind,
    extremized: Vec<Objective>,
    constraints: Vec<Objective>,
    models: HashMap<String, ObjectiveModel>,
    /// Best feasible valid score of the single extremized objective.
    best: Option<f64>,
    /// Weighted score-space Pareto front over the extremized objectives.
    front: Vec<Vec<f64>>,
    reference: Vec<f64>,
    hv_front: f64,
    /// Common random numbers for the Monte-Carlo hypervolume estimate,
    /// fixed at build time so the inner optimizer sees a deterministic
    /// surface.
    mc_normals: Vec<Vec<f64>>,
    ucb_beta: f64,
}

impl AcquisitionContext {
    pub fn new(
        kind: AcquisitionKind,
        bundle: &FittedModels,
        objectives: &[Objective],
        snapshot: &TableSnapshot,
        params: &AcqParams,
    ) -> LdResult<Self> {
        let extremized: Vec<Objective> = objectives
            .iter()
            .filter(|o| o.is_extremized())
            .cloned()
            .collect();
        let constraints: Vec<Objective> = objectives
            .iter()
            .filter(|o| o.is_constraint())
            .cloned()
            .collect();

        if extremized.is_empty() {
            return Err(config_error!(
                "No extremized objective; nothing to acquire for"
            ));
        }
        match kind {
            AcquisitionKind::ExpectedImprovement | AcquisitionKind::UpperConfidenceBound
                if extremized.len() > 1 =>
            {
                return Err(config_error!(
                    "{} needs a single extremized objective; use hypervolume-improvement",
                    kind.key()
                ));
            }
            AcquisitionKind::QuasiRandom => {
                return Err(config_error!(
                    "quasi-random sampling does not use a model context"
                ));
            }
            _ => {}
        }

        let mut models = HashMap::new();
        for objective in objectives {
            let model = bundle.get(&objective.name).ok_or_else(|| {
                config_error!("No fitted model for objective '{}'", objective.name)
            })?;
            models.insert(objective.name.clone(), model.clone());
        }

        let best = extremized
            .first()
            .and_then(|o| best_valid_score(snapshot, o));

        let (front, reference) = build_front(snapshot, &extremized);
        let hv_front = hypervolume(&front, &reference);

        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mc_normals = (0..params.hv_samples)
            .map(|_| (0..extremized.len()).map(|_| standard_normal(&mut rng)).collect())
            .collect();

        Ok(Self {
            kind,
            extremized,
            constraints,
            models,
            best,
            front,
            reference,
            hv_front,
            mc_normals,
            ucb_beta: params.ucb_beta,
        })
    }

    pub fn kind(&self) -> AcquisitionKind {
        self.kind
    }

    pub fn pareto_front(&self) -> &[Vec<f64>] {
        &self.front
    }

    /// Acquisition value at one normalized full input vector. Always
    /// finite and non-negative.
    pub fn value(&self, x: ArrayView1<'_, f64>) -> f64 {
        let feasibility = self.feasibility(x);
        let base = match self.kind {
            AcquisitionKind::ExpectedImprovement => self.expected_improvement(x),
            AcquisitionKind::UpperConfidenceBound => self.upper_confidence(x),
            AcquisitionKind::HypervolumeImprovement => self.hypervolume_improvement(x),
            AcquisitionKind::QuasiRandom => 0.0,
        };
        let value = feasibility * base;
        if value.is_finite() {
            value.max(0.0)
        } else {
            0.0
        }
    }

    /// Probability that every range objective lands inside its bounds.
    pub fn feasibility(&self, x: ArrayView1<'_, f64>) -> f64 {
        let mut p = 1.0;
        for objective in &self.constraints {
            let model = &self.models[&objective.name];
            let posterior = model.predict_raw(x);
            if let Target::Range { low, high } = objective.target {
                let sigma = posterior.sigma.max(1e-12);
                let upper = if high.is_infinite() {
                    1.0
                } else {
                    norm_cdf((high - posterior.mean) / sigma)
                };
                let lower = if low.is_infinite() {
                    0.0
                } else {
                    norm_cdf((low - posterior.mean) / sigma)
                };
                p *= (upper - lower).max(0.0);
            }
        }
        p
    }

    fn expected_improvement(&self, x: ArrayView1<'_, f64>) -> f64 {
        let objective = &self.extremized[0];
        let posterior = self.models[&objective.name].predict(x);
        if posterior.sigma < 1e-12 {
            return 0.0;
        }
        // Without any feasible observation yet, explore by uncertainty.
        let best = match self.best {
            Some(b) => b,
            None => return posterior.sigma,
        };
        let z = (posterior.mean - best) / posterior.sigma;
        (posterior.sigma * (z * norm_cdf(z) + norm_pdf(z))).max(0.0)
    }

    fn upper_confidence(&self, x: ArrayView1<'_, f64>) -> f64 {
        let objective = &self.extremized[0];
        let posterior = self.models[&objective.name].predict(x);
        let ucb = posterior.mean + self.ucb_beta * posterior.sigma;
        // exp keeps the ranking while making the value positive, so the
        // feasibility gate cannot invert it. Scores are standardized, so
        // the argument stays small.
        ucb.clamp(-40.0, 40.0).exp()
    }

    fn hypervolume_improvement(&self, x: ArrayView1<'_, f64>) -> f64 {
        if self.mc_normals.is_empty() {
            return 0.0;
        }
        let posteriors: Vec<_> = self
            .extremized
            .iter()
            .map(|o| self.models[&o.name].predict(x))
            .collect();

        let mut total = 0.0;
        let mut augmented = self.front.clone();
        for normals in &self.mc_normals {
            let sample: Vec<f64> = self
                .extremized
                .iter()
                .zip(posteriors.iter())
                .zip(normals.iter())
                .map(|((o, p), n)| o.weight * (p.mean + p.sigma * n))
                .collect();
            augmented.push(sample);
            let hv = hypervolume(&augmented, &self.reference);
            augmented.pop();
            total += (hv - self.hv_front).max(0.0);
        }
        total / self.mc_normals.len() as f64
    }

    /// Condition every model on its posterior mean at `x` (constant-liar
    /// fantasy) and fold the fantasized point into the front/best state.
    /// Lets batch selection account for points already chosen.
    pub fn fantasize(&self, x: ArrayView1<'_, f64>) -> LdResult<Self> {
        let mut next = self.clone();
        let mut fantasy_point = Vec::with_capacity(self.extremized.len());
        for objective in self.extremized.iter().chain(self.constraints.iter()) {
            let model = &self.models[&objective.name];
            let posterior = model.predict(x);
            let conditioned = model.gp.condition_on(&objective.name, x, posterior.mean)?;
            next.models.insert(
                objective.name.clone(),
                ObjectiveModel {
                    gp: conditioned,
                    transform: model.transform,
                },
            );
            if objective.is_extremized() {
                fantasy_point.push(objective.weight * posterior.mean);
                if self.extremized.len() == 1 {
                    let mean = posterior.mean;
                    next.best = Some(match self.best {
                        Some(b) => b.max(mean),
                        None => mean,
                    });
                }
            }
        }

        next.front.push(fantasy_point);
        let keep = pareto_front_indices(&next.front);
        next.front = keep.into_iter().map(|i| next.front[i].clone()).collect();
        next.hv_front = hypervolume(&next.front, &next.reference);
        Ok(next)
    }
}

/// Best feasible valid score, falling back to the best valid score when
/// nothing feasible has been observed yet.
fn best_valid_score(snapshot: &TableSnapshot, objective: &Objective) -> Option<f64> {
    snapshot.best_score(&objective.name).or_else(|| {
        snapshot
            .column(&objective.name)?
            .scores
            .iter()
            .filter_map(|s| *s)
            .fold(None, |best: Option<f64>, s| {
                Some(best.map_or(s, |b| b.max(s)))
            })
    })
}

/// Weighted score-space Pareto front over feasible records, plus the
/// hypervolume reference point: the configured threshold where present,
/// otherwise the empirical worst included value less a 10% span margin so
/// boundary points still dominate nonzero volume.
fn build_front(snapshot: &TableSnapshot, extremized: &[Objective]) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut points = Vec::new();
    for i in 0..snapshot.len() {
        if !snapshot.is_feasible(i) {
            continue;
        }
        let mut point = Vec::with_capacity(extremized.len());
        let mut complete = true;
        for objective in extremized {
            match snapshot.column(&objective.name).and_then(|c| c.scores[i]) {
                Some(score) => point.push(objective.weight * score),
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            points.push(point);
        }
    }

    let reference: Vec<f64> = extremized
        .iter()
        .enumerate()
        .map(|(j, objective)| {
            if let (Some(threshold), Some(column)) = (
                objective.threshold,
                snapshot.column(&objective.name),
            ) {
                return objective.weight * column.transform.score(threshold);
            }
            let values: Vec<f64> = points.iter().map(|p| p[j]).collect();
            match (
                values.iter().cloned().fold(f64::INFINITY, f64::min),
                values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            ) {
                (min, max) if min.is_finite() => {
                    let span = (max - min).max(1.0);
                    min - 0.1 * span
                }
                _ => -1.0,
            }
        })
        .collect();

    let keep = pareto_front_indices(&points);
    let front = keep.into_iter().map(|i| points[i].clone()).collect();
    (front, reference)
}

/// Box-Muller standard normal draw.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
