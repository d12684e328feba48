//! Global optimization of an acquisition criterion over the active-DOF
//! domain: seeded multi-start pattern search in the unit cube, with greedy
//! fantasized augmentation for batches.

use ld_types::{LdError, LdResult};
use ndarray::Array1;
use rayon::prelude::*;
use tracing::debug;

use crate::acquisition::AcquisitionContext;
use crate::qmc::HaltonSequence;

const INITIAL_STEP: f64 = 0.25;
const MIN_STEP: f64 = 1e-3;
const IMPROVEMENT_EPS: f64 = 1e-12;

/// Maps the optimizer's active-dimension vectors into full normalized
/// input vectors: inactive and read-only DOFs stay pinned at the template
/// values.
#[derive(Debug, Clone)]
pub struct DomainMap {
    template: Array1<f64>,
    active_idx: Vec<usize>,
}

impl DomainMap {
    pub fn new(template: Array1<f64>, active_idx: Vec<usize>) -> LdResult<Self> {
        if active_idx.is_empty() {
            return Err(LdError::EmptyDomain);
        }
        if active_idx.iter().any(|&i| i >= template.len()) {
            return Err(ld_types::config_error!(
                "active index out of range for {} DOFs",
                template.len()
            ));
        }
        Ok(Self {
            template,
            active_idx,
        })
    }

    pub fn active_dims(&self) -> usize {
        self.active_idx.len()
    }

    pub fn full_dims(&self) -> usize {
        self.template.len()
    }

    /// Embed an active-dimension vector into the full input vector.
    pub fn embed(&self, active: &[f64]) -> Array1<f64> {
        let mut full = self.template.clone();
        for (k, &i) in self.active_idx.iter().enumerate() {
            full[i] = active[k].clamp(0.0, 1.0);
        }
        full
    }

    /// Project a full vector down to its active coordinates.
    pub fn project(&self, full: &Array1<f64>) -> Vec<f64> {
        self.active_idx.iter().map(|&i| full[i]).collect()
    }
}

/// Quasi-random candidates over the active domain, embedded into full
/// vectors. The offset decorrelates independent draws.
pub fn quasi_random_batch(map: &DomainMap, n: usize, offset: u64) -> Vec<Array1<f64>> {
    let mut halton = HaltonSequence::with_offset(map.active_dims(), offset);
    halton
        .take_points(n)
        .into_iter()
        .map(|p| map.embed(&p.to_vec()))
        .collect()
}

/// Maximize the acquisition over the active domain from multiple starts.
///
/// Restarts run in parallel; each performs a coordinate pattern search with
/// step halving. Ties on acquisition value break lexicographically by the
/// candidate vector, smallest first, so results are deterministic.
pub fn optimize_single(
    ctx: &AcquisitionContext,
    map: &DomainMap,
    restarts: usize,
    seed: u64,
) -> LdResult<Array1<f64>> {
    let restarts = restarts.max(1);
    let mut starts: Vec<Vec<f64>> = HaltonSequence::with_offset(map.active_dims(), seed)
        .take_points(restarts)
        .into_iter()
        .map(|p| p.to_vec())
        .collect();
    // Center start keeps behavior sane in tiny domains.
    starts.push(vec![0.5; map.active_dims()]);

    let refined: Vec<(Vec<f64>, f64)> = starts
        .par_iter()
        .map(|start| refine(ctx, map, start.clone()))
        .collect();

    let mut best: Option<(Vec<f64>, f64)> = None;
    for (point, value) in refined {
        if !value.is_finite() {
            continue;
        }
        let better = match &best {
            None => true,
            Some((best_point, best_value)) => {
                value > *best_value
                    || ((value - best_value).abs() <= IMPROVEMENT_EPS
                        && lexicographically_less(&point, best_point))
            }
        };
        if better {
            best = Some((point, value));
        }
    }

    match best {
        Some((point, value)) => {
            debug!(value, "acquisition optimum");
            Ok(map.embed(&point))
        }
        None => Err(LdError::OptimizationFailed {
            restarts,
            message: "no restart produced a finite acquisition value".to_string(),
        }),
    }
}

/// Jointly select a batch of `n` points: greedy augmentation where each
/// chosen point is fantasized into the context before the next search, so
/// later points avoid collapsing onto earlier ones.
pub fn optimize_batch(
    ctx: &AcquisitionContext,
    map: &DomainMap,
    n: usize,
    restarts: usize,
    seed: u64,
) -> LdResult<Vec<Array1<f64>>> {
    let mut points = Vec::with_capacity(n);
    let mut current = ctx.clone();
    for k in 0..n {
        let point = optimize_single(&current, map, restarts, seed.wrapping_add(k as u64))?;
        if k + 1 < n {
            current = current.fantasize(point.view())?;
        }
        points.push(point);
    }
    Ok(points)
}

fn refine(ctx: &AcquisitionContext, map: &DomainMap, mut current: Vec<f64>) -> (Vec<f64>, f64) {
    let mut best_value = ctx.value(map.embed(&current).view());
    let mut step = INITIAL_STEP;
    while step > MIN_STEP {
        let mut improved = false;
        for i in 0..current.len() {
            for direction in [-1.0, 1.0] {
                let mut candidate = current.clone();
                candidate[i] = (candidate[i] + direction * step).clamp(0.0, 1.0);
                let value = ctx.value(map.embed(&candidate).view());
                if value > best_value + IMPROVEMENT_EPS {
                    current = candidate;
                    best_value = value;
                    improved = true;
                }
            }
        }
        if !improved {
            step *= 0.5;
        }
    }
    (current, best_value)
}

fn lexicographically_less(a: &[f64], b: &[f64]) -> bool {
    for (x, y) in a.iter().zip(b.iter()) {
        if x < y {
            return true;
        }
        if x > y {
            return false;
        }
    }
    false
}
