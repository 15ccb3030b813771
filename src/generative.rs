use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::sampler::SamplerError;

/// Data-generating coefficients for a simulated mediation study.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediationTruth {
    pub beta_m: Vec<f64>,
    pub alpha_a: Vec<f64>,
    pub beta_a: f64,
    /// Noise standard deviation of each mediator.
    pub sigma_m: f64,
    /// Noise standard deviation of the outcome.
    pub sigma_y: f64,
}

impl MediationTruth {
    pub fn n_mediators(&self) -> usize {
        self.beta_m.len()
    }
}

/// Simulated observations owned by the caller.
#[derive(Clone, Debug)]
pub struct SimulatedData {
    pub y: Array1<f64>,
    pub a: Array1<f64>,
    pub m: Array2<f64>,
}

/// Draws `A ~ N(0, 1)`, `M_j = alpha_a[j] A + N(0, sigma_m²)` and
/// `Y = beta_a A + M beta_m + N(0, sigma_y²)`.
pub fn simulate_mediation_data<R: Rng + ?Sized>(
    truth: &MediationTruth,
    n: usize,
    rng: &mut R,
) -> Result<SimulatedData, SamplerError> {
    let q = truth.n_mediators();
    if truth.alpha_a.len() != q {
        return Err(SamplerError::InvalidDimension {
            what: "true alpha_a",
            expected: q,
            found: truth.alpha_a.len(),
        });
    }
    if n == 0 || q == 0 {
        return Err(SamplerError::InvalidInput(
            "simulation needs at least one observation and one mediator".to_string(),
        ));
    }
    let noise_m = Normal::new(0.0, truth.sigma_m).map_err(|e| {
        SamplerError::InvalidInput(format!("invalid mediator noise sd {}: {e}", truth.sigma_m))
    })?;
    let noise_y = Normal::new(0.0, truth.sigma_y).map_err(|e| {
        SamplerError::InvalidInput(format!("invalid outcome noise sd {}: {e}", truth.sigma_y))
    })?;

    let a: Array1<f64> = (0..n)
        .map(|_| -> f64 { StandardNormal.sample(&mut *rng) })
        .collect();
    let mut m = Array2::<f64>::zeros((n, q));
    for i in 0..n {
        for j in 0..q {
            m[[i, j]] = truth.alpha_a[j] * a[i] + noise_m.sample(rng);
        }
    }
    let beta_m = ArrayView1::from(&truth.beta_m[..]);
    let mut y = m.dot(&beta_m);
    for i in 0..n {
        y[i] += truth.beta_a * a[i] + noise_y.sample(rng);
    }
    Ok(SimulatedData { y, a, m })
}

/// Shuffled copy of the exposure for a null permutation run.
pub fn permute_exposure<R: Rng + ?Sized>(a: ArrayView1<'_, f64>, rng: &mut R) -> Array1<f64> {
    let mut values = a.to_vec();
    values.shuffle(rng);
    Array1::from(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn truth() -> MediationTruth {
        MediationTruth {
            beta_m: vec![0.5, 0.0],
            alpha_a: vec![0.6, 0.0],
            beta_a: 0.3,
            sigma_m: 1.0,
            sigma_y: 1.0,
        }
    }

    #[test]
    fn simulated_shapes_and_slopes() {
        let mut rng = StdRng::seed_from_u64(12);
        let sim = simulate_mediation_data(&truth(), 4000, &mut rng).expect("valid truth");
        assert_eq!(sim.m.dim(), (4000, 2));
        let slope = sim.a.dot(&sim.m.column(0)) / sim.a.dot(&sim.a);
        assert!((slope - 0.6).abs() < 0.05, "slope {slope}");
    }

    #[test]
    fn mismatched_truth_is_rejected() {
        let mut bad = truth();
        bad.alpha_a.push(1.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(simulate_mediation_data(&bad, 10, &mut rng).is_err());
    }

    #[test]
    fn permutation_preserves_values() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = Array1::from_iter((0..50).map(|i| i as f64));
        let p = permute_exposure(a.view(), &mut rng);
        let mut sorted = p.to_vec();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted, a.to_vec());
        assert_ne!(p, a);
    }
}
