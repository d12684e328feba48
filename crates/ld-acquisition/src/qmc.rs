//! Low-discrepancy sampling over the unit cube.
//!
//! Used both for the quasi-random acquisition mode and for seeding the
//! restarts of the inner optimizer.

use ndarray::Array1;

/// First `n` primes, one base per dimension.
fn primes(n: usize) -> Vec<u64> {
    let mut found: Vec<u64> = Vec::with_capacity(n);
    let mut candidate = 2u64;
    while found.len() < n {
        if found.iter().all(|p| candidate % p != 0) {
            found.push(candidate);
        }
        candidate += 1;
    }
    found
}

/// Van der Corput radical inverse in the given base.
fn radical_inverse(base: u64, mut index: u64) -> f64 {
    let mut result = 0.0;
    let mut fraction = 1.0 / base as f64;
    while index > 0 {
        result += (index % base) as f64 * fraction;
        index /= base;
        fraction /= base as f64;
    }
    result
}

/// A Halton sequence over `dims` dimensions.
///
/// The first element (all zeros) is always skipped; an additional offset
/// decorrelates sequences drawn for different purposes from the same seed.
#[derive(Debug, Clone)]
pub struct HaltonSequence {
    bases: Vec<u64>,
    index: u64,
}

impl HaltonSequence {
    pub fn new(dims: usize) -> Self {
        Self::with_offset(dims, 0)
    }

    pub fn with_offset(dims: usize, offset: u64) -> Self {
        Self {
            bases: primes(dims),
            index: 1 + offset,
        }
    }

    pub fn dims(&self) -> usize {
        self.bases.len()
    }

    /// Next point in [0, 1)^dims.
    pub fn next_point(&mut self) -> Array1<f64> {
        let point = Array1::from_iter(
            self.bases
                .iter()
                .map(|&base| radical_inverse(base, self.index)),
        );
        self.index += 1;
        point
    }

    pub fn take_points(&mut self, n: usize) -> Vec<Array1<f64>> {
        (0..n).map(|_| self.next_point()).collect()
    }
}
