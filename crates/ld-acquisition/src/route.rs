//! Route planning for a proposed batch: visit every point once, starting
//! from the current position, keeping total movement cost low.
//!
//! Batch sizes are single-digit to low tens, so nearest-neighbour
//! construction followed by 2-opt improvement is plenty; optimality is not
//! required, validity of the permutation is.

use ndarray::Array1;

/// Movement cost between two normalized input vectors: weighted Euclidean
/// distance, uniform weights by default.
#[derive(Debug, Clone)]
pub struct MovementMetric {
    weights: Option<Vec<f64>>,
}

impl Default for MovementMetric {
    fn default() -> Self {
        Self { weights: None }
    }
}

impl MovementMetric {
    pub fn weighted(weights: Vec<f64>) -> Self {
        Self {
            weights: Some(weights),
        }
    }

    pub fn cost(&self, a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .enumerate()
            .map(|(i, (x, y))| {
                let w = self.weights.as_ref().and_then(|w| w.get(i)).copied().unwrap_or(1.0);
                w * (x - y) * (x - y)
            })
            .sum::<f64>()
            .sqrt()
    }
}

/// Visiting order for `points` starting from `start`: a permutation of
/// `0..points.len()`. Identity for batches of one or zero.
pub fn order(points: &[Array1<f64>], start: &Array1<f64>, metric: &MovementMetric) -> Vec<usize> {
    let n = points.len();
    if n <= 1 {
        return (0..n).collect();
    }

    // Nearest-neighbour construction from the current position.
    let mut route: Vec<usize> = Vec::with_capacity(n);
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut position = start.clone();
    while !remaining.is_empty() {
        let (k, _) = remaining
            .iter()
            .enumerate()
            .map(|(k, &i)| (k, metric.cost(&position, &points[i])))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((0, 0.0));
        let next = remaining.swap_remove(k);
        position = points[next].clone();
        route.push(next);
    }

    // 2-opt on the open path (the agent does not return to the start).
    let mut improved = true;
    while improved {
        improved = false;
        for i in 0..n - 1 {
            for j in (i + 1)..n {
                let before = segment_cost(&route, points, start, metric);
                route[i..=j].reverse();
                let after = segment_cost(&route, points, start, metric);
                if after + 1e-12 < before {
                    improved = true;
                } else {
                    route[i..=j].reverse();
                }
            }
        }
    }

    route
}

/// Total path cost for a given visiting order.
pub fn total_cost(
    route: &[usize],
    points: &[Array1<f64>],
    start: &Array1<f64>,
    metric: &MovementMetric,
) -> f64 {
    segment_cost(route, points, start, metric)
}

fn segment_cost(
    route: &[usize],
    points: &[Array1<f64>],
    start: &Array1<f64>,
    metric: &MovementMetric,
) -> f64 {
    let mut cost = 0.0;
    let mut position = start;
    for &i in route {
        cost += metric.cost(position, &points[i]);
        position = &points[i];
    }
    cost
}
