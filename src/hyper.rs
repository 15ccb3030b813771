//! Conjugate updates for the direct effect and the variance hyperparameters.
//!
//! Every variance is inverse-gamma with shape/rate parametrization and is drawn
//! as the reciprocal of a Gamma(shape, 1/rate) variate.

use crate::probability::{sample_inverse_gamma, sample_normal};
use crate::residual::shift_residual;
use crate::sampler::SamplerError;
use crate::state::ModelState;

impl ModelState<'_> {
    /// Draws `sigma_e` and `sigma_g` from the current residuals.
    ///
    /// `sigma_e ~ IG(he + n/2, le + |res1|²/2)` and
    /// `sigma_g ~ IG(hg + q·n/2, lg + |res2|²_F/2)`.
    pub fn update_noise_variances(&mut self) -> Result<(), SamplerError> {
        let n = self.data.n_obs() as f64;
        let q = self.data.n_mediators() as f64;
        let sse_y = self.res1.dot(&self.res1);
        let sse_m = self.res2.iter().map(|r| r * r).sum::<f64>();

        self.variances.sigma_e = sample_inverse_gamma(
            &mut self.rng,
            self.priors.he + n / 2.0,
            self.priors.le + sse_y / 2.0,
            "sigma_e",
        )?;
        self.variances.sigma_g = sample_inverse_gamma(
            &mut self.rng,
            self.priors.hg + q * (n / 2.0),
            self.priors.lg + sse_m / 2.0,
            "sigma_g",
        )?;
        Ok(())
    }

    /// Draws `beta_a` from `N(var_a·A'(res1 + beta_a A)/sigma_e, var_a)` with
    /// `var_a = sigma_e / A'A`, then folds the change into `res1`.
    pub fn update_direct_effect(&mut self) -> Result<(), SamplerError> {
        let data = self.data;
        let sigma_e = self.variances.sigma_e;
        let var_a = sigma_e / self.a2norm;
        let old = self.beta_a;
        let xr = data.a.dot(&self.res1) + old * self.a2norm;
        let mean = var_a * xr / sigma_e;
        let new = sample_normal(&mut self.rng, mean, var_a.sqrt(), "beta_a")?;
        shift_residual(self.res1.view_mut(), data.a, old, new);
        self.beta_a = new;
        Ok(())
    }

    /// `sigma_a ~ IG(ha + 1/2, la + beta_a²/2)`.
    pub fn update_direct_effect_variance(&mut self) -> Result<(), SamplerError> {
        self.variances.sigma_a = sample_inverse_gamma(
            &mut self.rng,
            self.priors.ha + 0.5,
            self.priors.la + self.beta_a * self.beta_a / 2.0,
            "sigma_a",
        )?;
        Ok(())
    }

    /// Pooled shrinkage variances from the raw coefficient vectors:
    /// `sigma_m1 ~ IG(km1 + q/2, lm1 + Σ beta_m²/2)` and likewise for
    /// `sigma_ma1`. Returns the two half sums of squares.
    pub fn update_shrinkage_variances(&mut self) -> Result<(f64, f64), SamplerError> {
        let half_q = self.data.n_mediators() as f64 / 2.0;
        let beta_half_ss = self.beta_m.dot(&self.beta_m) / 2.0;
        let alpha_half_ss = self.alpha_a.dot(&self.alpha_a) / 2.0;

        self.variances.sigma_m1 = sample_inverse_gamma(
            &mut self.rng,
            self.priors.km1 + half_q,
            self.priors.lm1 + beta_half_ss,
            "sigma_m1",
        )?;
        self.variances.sigma_ma1 = sample_inverse_gamma(
            &mut self.rng,
            self.priors.kma1 + half_q,
            self.priors.lma1 + alpha_half_ss,
            "sigma_ma1",
        )?;
        Ok((beta_half_ss, alpha_half_ss))
    }
}

#[cfg(test)]
mod tests {
    use crate::data::MediationData;
    use crate::state::{InitialCoefficients, ModelState};
    use crate::types::{Hyperpriors, PenaltyThresholds};
    use ndarray::{Array1, Array2};

    #[test]
    fn direct_effect_concentrates_on_truth_without_mediators() {
        let n = 400;
        let a = Array1::from_iter((0..n).map(|i| ((i as f64) * 0.37).sin()));
        let y = a.mapv(|v| 1.25 * v);
        let m = Array2::<f64>::from_shape_fn((n, 1), |(i, _)| ((i as f64) * 1.3).cos());
        let data = MediationData::new(y.view(), a.view(), m.view()).expect("valid");
        let penalty = PenaltyThresholds::new(10.0, 10.0, 10.0).expect("valid");
        let mut state = ModelState::new(
            data,
            InitialCoefficients::zeros(1),
            Hyperpriors::default(),
            penalty,
            99,
        )
        .expect("valid");
        let mut total = 0.0;
        let draws = 200;
        for _ in 0..draws {
            state.update_noise_variances().expect("finite");
            state.update_direct_effect().expect("finite");
            total += state.beta_a();
        }
        let mean = total / draws as f64;
        assert!((mean - 1.25).abs() < 0.05, "posterior mean {mean}");
        assert!(state.residual_drift() < 1e-9);
    }

    #[test]
    fn shrinkage_variances_stay_positive_with_zero_coefficients() {
        let n = 10;
        let a = Array1::from_iter((0..n).map(|i| i as f64 - 4.5));
        let y = a.clone();
        let m = Array2::<f64>::from_shape_fn((n, 3), |(i, j)| ((i + j) as f64).sin());
        let data = MediationData::new(y.view(), a.view(), m.view()).expect("valid");
        let penalty = PenaltyThresholds::new(0.1, 0.2, 0.2).expect("valid");
        let mut state = ModelState::new(
            data,
            InitialCoefficients::zeros(3),
            Hyperpriors::default(),
            penalty,
            5,
        )
        .expect("valid");
        for _ in 0..100 {
            let (b, a) = state.update_shrinkage_variances().expect("finite");
            assert_eq!((b, a), (0.0, 0.0));
            assert!(state.variances().sigma_m1 > 0.0);
            assert!(state.variances().sigma_ma1 > 0.0);
        }
        state.update_direct_effect_variance().expect("finite");
        assert!(state.variances().all_positive());
    }
}
