//! Pareto dominance and hypervolume over score-space points.
//!
//! All functions here assume maximize-oriented coordinates (the snapshot
//! layer has already sign-flipped minimize objectives) and that feasibility
//! filtering happened upstream.

/// Whether `a` dominates `b`: at least as good everywhere, strictly better
/// somewhere.
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly_better = false;
    for (x, y) in a.iter().zip(b.iter()) {
        if x < y {
            return false;
        }
        if x > y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Indices of the non-dominated subset.
pub fn pareto_front_indices(points: &[Vec<f64>]) -> Vec<usize> {
    (0..points.len())
        .filter(|&i| {
            !points
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && dominates(other, &points[i]))
        })
        .collect()
}

/// Exact dominated hypervolume of a point set against a reference point
/// that is worse than (or equal to) every point of interest. Points not
/// strictly better than the reference in every coordinate contribute
/// nothing. Recursive slicing; intended for the small fronts produced by
/// single-digit batch sizes.
pub fn hypervolume(points: &[Vec<f64>], reference: &[f64]) -> f64 {
    let clipped: Vec<Vec<f64>> = points
        .iter()
        .filter(|p| p.iter().zip(reference.iter()).all(|(a, r)| a > r))
        .cloned()
        .collect();
    hv_sliced(&clipped, reference)
}

fn hv_sliced(points: &[Vec<f64>], reference: &[f64]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let d = reference.len();
    if d == 1 {
        return points
            .iter()
            .map(|p| p[0] - reference[0])
            .fold(0.0, f64::max);
    }

    // Sweep the last coordinate from best to worst; each slab contributes
    // its height times the (d-1)-dimensional volume of the points reaching
    // that high.
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| {
        b[d - 1]
            .partial_cmp(&a[d - 1])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut volume = 0.0;
    for k in 0..sorted.len() {
        let z_hi = sorted[k][d - 1];
        let z_lo = if k + 1 < sorted.len() {
            sorted[k + 1][d - 1]
        } else {
            reference[d - 1]
        };
        let height = z_hi - z_lo;
        if height > 0.0 {
            let slab: Vec<Vec<f64>> = sorted[..=k].iter().map(|p| p[..d - 1].to_vec()).collect();
            volume += height * hv_sliced(&slab, &reference[..d - 1]);
        }
    }
    volume
}
