//! Simulated devices for tests and demos.
//!
//! The simulated beamline responds to named DOF positions with a noisy
//! Gaussian peak; the drift signal models an uncontrolled read-only input.

use async_trait::async_trait;
use ld_types::{DofValue, LdResult};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use crate::execution::{Executor, RawMeasurement};

/// A synthetic beamline: detector intensity is a Gaussian peak over the
/// continuous DOFs, with multiplicative measurement noise. The readback of
/// every DOF in the request is echoed into the raw measurement alongside
/// the `intensity` key.
pub struct SimulatedBeamline {
    /// Peak center per DOF name; DOFs not listed do not affect intensity.
    centers: HashMap<String, f64>,
    /// Peak width in DOF units.
    width: f64,
    /// Relative noise amplitude.
    noise: f64,
    rng: Mutex<ChaCha8Rng>,
}

impl SimulatedBeamline {
    pub fn new(centers: HashMap<String, f64>, width: f64, noise: f64, seed: u64) -> Self {
        Self {
            centers,
            width,
            noise,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    fn intensity(&self, point: &HashMap<String, DofValue>) -> f64 {
        let mut d2 = 0.0;
        for (name, center) in &self.centers {
            if let Some(DofValue::Float(v)) = point.get(name) {
                d2 += (v - center).powi(2);
            }
        }
        (-d2 / (2.0 * self.width * self.width)).exp()
    }
}

#[async_trait]
impl Executor for SimulatedBeamline {
    async fn execute(
        &self,
        batch: &[HashMap<String, DofValue>],
        _position: &HashMap<String, DofValue>,
    ) -> LdResult<Vec<RawMeasurement>> {
        let mut results = Vec::with_capacity(batch.len());
        for point in batch {
            let base = self.intensity(point);
            let noise_factor = {
                let mut rng = self.rng.lock();
                1.0 + self.noise * (rng.gen::<f64>() - 0.5)
            };
            let mut values: HashMap<String, f64> = point
                .iter()
                .filter_map(|(k, v)| v.as_float().map(|f| (k.clone(), f)))
                .collect();
            values.insert("intensity".to_string(), base * noise_factor);
            debug!(intensity = base * noise_factor, "simulated exposure");
            results.push(RawMeasurement::success(values));
        }
        Ok(results)
    }
}

/// Mean-reverting drift signal for a read-only DOF.
pub struct BrownianDrift {
    theta: f64,
    state: Mutex<(Instant, f64, ChaCha8Rng)>,
}

impl BrownianDrift {
    pub fn new(theta: f64, seed: u64) -> Self {
        Self {
            theta: theta.clamp(0.0, 1.0 - 1e-9),
            state: Mutex::new((Instant::now(), 0.0, ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Advance the process to now and return its value.
    pub fn read(&self) -> f64 {
        let mut state = self.state.lock();
        let (ref mut last, ref mut value, ref mut rng) = *state;
        let now = Instant::now();
        let alpha = self.theta.powf(now.duration_since(*last).as_secs_f64());
        let shock: f64 = {
            let u1: f64 = 1.0 - rng.gen::<f64>();
            let u2: f64 = rng.gen();
            (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        };
        *value = alpha * *value + (1.0 - alpha * alpha).sqrt() * shock;
        *last = now;
        *value
    }
}
