use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::data::MediationData;
use crate::probability::{sample_inverse_gamma, sample_normal};
use crate::recorder::SampleRow;
use crate::sampler::{FinalParameters, SamplerError};
use crate::types::{Hyperpriors, MixtureLabel, PenaltyThresholds, VarianceState};

/// Caller-supplied starting values for the mediator coefficients.
#[derive(Clone, Debug)]
pub struct InitialCoefficients {
    pub beta_m: Array1<f64>,
    pub alpha_a: Array1<f64>,
}

impl InitialCoefficients {
    pub fn new(beta_m: Array1<f64>, alpha_a: Array1<f64>) -> Self {
        Self { beta_m, alpha_a }
    }

    pub fn zeros(q: usize) -> Self {
        Self {
            beta_m: Array1::zeros(q),
            alpha_a: Array1::zeros(q),
        }
    }

    /// Marginal least-squares starting values.
    pub fn marginal(data: &MediationData<'_>) -> Self {
        let (beta_m, alpha_a) = data.marginal_estimates();
        Self {
            beta_m: Array1::from(beta_m),
            alpha_a: Array1::from(alpha_a),
        }
    }
}

/// All mutable state of one chain.
///
/// Parameters, thresholded values, labels, variances, residuals and the random
/// stream are owned here; the observations are borrowed read-only.
pub struct ModelState<'a> {
    pub(crate) data: MediationData<'a>,
    pub(crate) priors: Hyperpriors,
    pub(crate) penalty: PenaltyThresholds,

    pub(crate) beta_m: Array1<f64>,
    pub(crate) alpha_a: Array1<f64>,
    pub(crate) beta_a: f64,
    pub(crate) thd_beta_m: Array1<f64>,
    pub(crate) thd_alpha_a: Array1<f64>,
    pub(crate) r1: Vec<MixtureLabel>,
    pub(crate) r3: Vec<MixtureLabel>,
    pub(crate) variances: VarianceState,

    /// `A'A`
    pub(crate) a2norm: f64,
    /// `M_j'M_j` per mediator
    pub(crate) m2norm: Array1<f64>,

    /// `Y - beta_a A - M thd_beta_m`
    pub(crate) res1: Array1<f64>,
    /// `M_j - A thd_alpha_a[j]` per column
    pub(crate) res2: Array2<f64>,

    pub(crate) rng: StdRng,
}

impl<'a> ModelState<'a> {
    /// Draws the initial variances and `beta_a` from their priors, precomputes
    /// the predictor norms and builds the residuals from scratch.
    pub fn new(
        data: MediationData<'a>,
        init: InitialCoefficients,
        priors: Hyperpriors,
        penalty: PenaltyThresholds,
        seed: u64,
    ) -> Result<Self, SamplerError> {
        data.check_mediator_len("initial beta_m", init.beta_m.len())?;
        data.check_mediator_len("initial alpha_a", init.alpha_a.len())?;
        if init
            .beta_m
            .iter()
            .chain(init.alpha_a.iter())
            .any(|v| !v.is_finite())
        {
            return Err(SamplerError::InvalidInput(
                "initial coefficients must be finite".to_string(),
            ));
        }
        priors.validate()?;
        penalty.validate()?;

        let a2norm = data.a.dot(&data.a);
        if !(a2norm > 0.0) {
            return Err(SamplerError::InvalidInput(
                "exposure has zero sum of squares".to_string(),
            ));
        }
        let m2norm: Array1<f64> = data
            .m
            .axis_iter(Axis(1))
            .map(|col| col.dot(&col))
            .collect();

        log::info!(
            "lambda0 {:.3e} lambda1 {:.3e} lambda2 {:.3e}",
            penalty.lambda0,
            penalty.lambda1,
            penalty.lambda2
        );

        let mut rng = StdRng::seed_from_u64(seed);
        let sigma_a = sample_inverse_gamma(&mut rng, priors.ha, priors.la, "initial sigma_a")?;
        let sigma_g = sample_inverse_gamma(&mut rng, priors.hg, priors.lg, "initial sigma_g")?;
        let sigma_e = sample_inverse_gamma(&mut rng, priors.he, priors.le, "initial sigma_e")?;
        let beta_a = sample_normal(&mut rng, 0.0, sigma_a.sqrt(), "initial beta_a")?;

        let q = data.n_mediators();
        let n = data.n_obs();
        let mut state = Self {
            data,
            priors,
            penalty,
            beta_m: init.beta_m,
            alpha_a: init.alpha_a,
            beta_a,
            thd_beta_m: Array1::zeros(q),
            thd_alpha_a: Array1::zeros(q),
            r1: vec![MixtureLabel::Spike; q],
            r3: vec![MixtureLabel::Spike; q],
            variances: VarianceState {
                sigma_e,
                sigma_g,
                sigma_a,
                sigma_m1: priors.beta_m_prior_mean(),
                sigma_ma1: priors.alpha_a_prior_mean(),
            },
            a2norm,
            m2norm,
            res1: Array1::zeros(n),
            res2: Array2::zeros((n, q)),
            rng,
        };
        state.recompute_residuals();
        Ok(state)
    }

    pub fn data(&self) -> &MediationData<'a> {
        &self.data
    }

    pub fn penalty(&self) -> &PenaltyThresholds {
        &self.penalty
    }

    pub fn priors(&self) -> &Hyperpriors {
        &self.priors
    }

    pub fn beta_m(&self) -> &Array1<f64> {
        &self.beta_m
    }

    pub fn alpha_a(&self) -> &Array1<f64> {
        &self.alpha_a
    }

    pub fn beta_a(&self) -> f64 {
        self.beta_a
    }

    pub fn thresholded_beta_m(&self) -> &Array1<f64> {
        &self.thd_beta_m
    }

    pub fn thresholded_alpha_a(&self) -> &Array1<f64> {
        &self.thd_alpha_a
    }

    pub fn r1(&self) -> &[MixtureLabel] {
        &self.r1
    }

    pub fn r3(&self) -> &[MixtureLabel] {
        &self.r3
    }

    pub fn variances(&self) -> &VarianceState {
        &self.variances
    }

    pub fn outcome_residual(&self) -> &Array1<f64> {
        &self.res1
    }

    pub fn mediator_residuals(&self) -> &Array2<f64> {
        &self.res2
    }

    /// Current draw laid out for the sample table.
    pub fn sample_row(&self) -> SampleRow {
        SampleRow {
            beta_m: self.beta_m.to_vec(),
            alpha_a: self.alpha_a.to_vec(),
            r1: self.r1.clone(),
            r3: self.r3.clone(),
            beta_a: self.beta_a,
            sigma_e: self.variances.sigma_e,
            sigma_g: self.variances.sigma_g,
            log_posterior: self.log_posterior(),
        }
    }

    pub fn final_parameters(&self) -> FinalParameters {
        FinalParameters {
            beta_m: self.beta_m.clone(),
            alpha_a: self.alpha_a.clone(),
            beta_a: self.beta_a,
            r1: self.r1.clone(),
            r3: self.r3.clone(),
            variances: self.variances,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn toy() -> (Array1<f64>, Array1<f64>, Array2<f64>) {
        let a = array![1.0, -0.5, 0.25, 2.0, -1.0];
        let m = array![
            [0.5, 1.0],
            [-0.2, 0.3],
            [0.1, -0.4],
            [1.1, 0.0],
            [-0.6, 0.2]
        ];
        let y = array![0.7, -0.1, 0.0, 1.5, -0.9];
        (y, a, m)
    }

    #[test]
    fn initial_labels_agree_with_thresholded_values() {
        let (y, a, m) = toy();
        let data = MediationData::new(y.view(), a.view(), m.view()).expect("valid");
        let init = InitialCoefficients::new(array![0.5, -0.01], array![-0.4, 0.02]);
        let penalty = PenaltyThresholds::new(0.1, 0.3, 0.3).expect("valid");
        let state =
            ModelState::new(data, init, Hyperpriors::default(), penalty, 3).expect("valid");
        assert_eq!(state.r1(), &[MixtureLabel::Positive, MixtureLabel::Spike]);
        assert_eq!(state.r3(), &[MixtureLabel::Negative, MixtureLabel::Spike]);
        assert_eq!(state.thresholded_beta_m()[1], 0.0);
        assert!(state.variances().all_positive());
        assert!((state.variances().sigma_m1 - 0.9).abs() < 1e-12);
    }

    #[test]
    fn wrong_initial_length_is_a_dimension_error() {
        let (y, a, m) = toy();
        let data = MediationData::new(y.view(), a.view(), m.view()).expect("valid");
        let init = InitialCoefficients::zeros(3);
        let penalty = PenaltyThresholds::new(0.1, 0.3, 0.3).expect("valid");
        let err = ModelState::new(data, init, Hyperpriors::default(), penalty, 3)
            .err()
            .expect("mismatch must fail");
        assert!(matches!(err, SamplerError::InvalidDimension { .. }));
    }

    #[test]
    fn zero_exposure_is_rejected() {
        let (y, _, m) = toy();
        let a = Array1::<f64>::zeros(5);
        let data = MediationData::new(y.view(), a.view(), m.view()).expect("valid");
        let penalty = PenaltyThresholds::new(0.1, 0.3, 0.3).expect("valid");
        let res = ModelState::new(
            data,
            InitialCoefficients::zeros(2),
            Hyperpriors::default(),
            penalty,
            3,
        );
        assert!(matches!(res, Err(SamplerError::InvalidInput(_))));
    }
}
