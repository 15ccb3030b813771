//! Coupled spike/slab update of `beta_m[j]` and `alpha_a[j]`.
//!
//! Each coordinate has a Normal-Normal full conditional `N(mean, var)` and a
//! threshold `t`. The prior is a three-component mixture: a spike (thresholded
//! value 0, latent draw from the slab prior restricted to `(-t, t)`), a right
//! tail `(t, ∞)` and a left tail `(-∞, -t)`. With `s` the slab prior variance,
//! the component log weights are
//!
//! ```text
//! w_spike = log P(|N(0, s)| < t)
//! w_right = mean²/(2 var) + ½ log(var/s) + log P(N(mean, var) > t)
//! w_left  = mean²/(2 var) + ½ log(var/s) + log P(N(mean, var) < -t)
//! ```
//!
//! `t` for `beta_m[j]` is `min(lambda1, lambda0/|alpha_a[j]|)` and for
//! `alpha_a[j]` it is `min(lambda2, lambda0/|beta_m[j]|)` with the freshly drawn
//! `beta_m[j]`, so the two draws within one `j` are sequential. Coordinates
//! are visited in increasing `j` and every step reads residuals left by the
//! previous one.

use rand::Rng;

use crate::probability::{
    log_central_mass, log_normal_sf, sample_log_weights, sample_truncated_above,
    sample_truncated_below, sample_truncated_between,
};
use crate::residual::shift_residual;
use crate::sampler::SamplerError;
use crate::state::ModelState;
use crate::types::MixtureLabel;

/// Full-conditional moments of one coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionalMoments {
    pub mean: f64,
    pub variance: f64,
}

impl ConditionalMoments {
    /// Moments for a coefficient with predictor sum of squares `x2`, noise
    /// variance `noise_var`, prior variance `prior_var` and partial residual
    /// cross-product `xr = x'(r + x·current)`.
    pub fn normal_normal(
        xr: f64,
        x2: f64,
        noise_var: f64,
        prior_var: f64,
        context: &str,
    ) -> Result<Self, SamplerError> {
        if !(noise_var.is_finite() && noise_var > 0.0) {
            return Err(SamplerError::numeric(
                format!("{context} (noise variance)"),
                noise_var,
            ));
        }
        if !(prior_var.is_finite() && prior_var > 0.0) {
            return Err(SamplerError::numeric(
                format!("{context} (prior variance)"),
                prior_var,
            ));
        }
        let variance = 1.0 / (1.0 / prior_var + x2 / noise_var);
        let mean = xr / (noise_var / prior_var + x2);
        if !(variance.is_finite() && variance > 0.0) {
            return Err(SamplerError::numeric(
                format!("{context} (posterior variance)"),
                variance,
            ));
        }
        if !mean.is_finite() {
            return Err(SamplerError::numeric(
                format!("{context} (posterior mean)"),
                mean,
            ));
        }
        Ok(Self { mean, variance })
    }
}

/// Log weights of `[spike, right tail, left tail]`.
pub fn mixture_log_weights(moments: ConditionalMoments, prior_var: f64, threshold: f64) -> [f64; 3] {
    let sd = moments.variance.sqrt();
    let slab = moments.mean * moments.mean / (2.0 * moments.variance)
        + 0.5 * (moments.variance / prior_var).ln();
    let right = log_normal_sf((threshold - moments.mean) / sd);
    let left = log_normal_sf((threshold + moments.mean) / sd);
    [
        log_central_mass(threshold / prior_var.sqrt()),
        slab + right,
        slab + left,
    ]
}

/// Outcome of one spike/slab draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeSlabDraw {
    pub label: MixtureLabel,
    /// Latent value carried by the coefficient.
    pub value: f64,
    /// Value seen by the likelihood: 0 for the spike.
    pub thresholded: f64,
}

/// Draws the component label and then the coefficient within it.
///
/// A non-finite tail draw is clamped to the boundary it was truncated at; a
/// failed spike draw falls back to the band's center, 0.
pub fn draw_spike_slab<R: Rng + ?Sized>(
    rng: &mut R,
    moments: ConditionalMoments,
    prior_var: f64,
    threshold: f64,
    context: &str,
) -> Result<SpikeSlabDraw, SamplerError> {
    let log_weights = mixture_log_weights(moments, prior_var, threshold);
    let index = sample_log_weights(rng, &log_weights, context)?;
    let label = MixtureLabel::from_index(index)
        .ok_or_else(|| SamplerError::numeric(format!("{context} (label)"), index as f64))?;
    let sd = moments.variance.sqrt();
    let draw = match label {
        MixtureLabel::Positive => {
            let v = sample_truncated_below(rng, moments.mean, sd, threshold);
            let value = clamp_non_finite(v, threshold, context);
            SpikeSlabDraw {
                label,
                value,
                thresholded: value,
            }
        }
        MixtureLabel::Negative => {
            let v = sample_truncated_above(rng, moments.mean, sd, -threshold);
            let value = clamp_non_finite(v, -threshold, context);
            SpikeSlabDraw {
                label,
                value,
                thresholded: value,
            }
        }
        MixtureLabel::Spike => {
            let value = spike_latent(rng, prior_var, threshold, context);
            SpikeSlabDraw {
                label,
                value,
                thresholded: 0.0,
            }
        }
    };
    Ok(draw)
}

/// Latent value under the spike: the slab prior restricted to `(-t, t)`.
/// Only the likelihood sees 0.
fn spike_latent<R: Rng + ?Sized>(rng: &mut R, prior_var: f64, threshold: f64, context: &str) -> f64 {
    let v = sample_truncated_between(rng, 0.0, prior_var.sqrt(), -threshold, threshold);
    clamp_non_finite(v, 0.0, context)
}

#[inline]
fn clamp_non_finite(value: f64, boundary: f64, context: &str) -> f64 {
    if value.is_finite() {
        value
    } else {
        log::debug!("{context}: truncated draw failed, clamped to {boundary:.6e}");
        boundary
    }
}

impl ModelState<'_> {
    /// One sweep over the mediators in increasing `j`.
    pub fn update_mediators(&mut self) -> Result<(), SamplerError> {
        let data = self.data;
        let sigma_e = self.variances.sigma_e;
        let sigma_g = self.variances.sigma_g;
        let sigma_m1 = self.variances.sigma_m1;
        let sigma_ma1 = self.variances.sigma_ma1;

        for j in 0..data.n_mediators() {
            let m_j = data.m.column(j);

            // beta_m[j] against res1 with its own contribution added back.
            let old_thd_beta = self.thd_beta_m[j];
            let xr = m_j.dot(&self.res1) + self.m2norm[j] * old_thd_beta;
            let moments =
                ConditionalMoments::normal_normal(xr, self.m2norm[j], sigma_e, sigma_m1, "beta_m")?;
            let threshold = self.penalty.beta_threshold(self.alpha_a[j]);
            let draw = draw_spike_slab(&mut self.rng, moments, sigma_m1, threshold, "beta_m")?;
            self.beta_m[j] = draw.value;
            self.r1[j] = draw.label;
            shift_residual(self.res1.view_mut(), m_j, old_thd_beta, draw.thresholded);
            self.thd_beta_m[j] = draw.thresholded;

            // alpha_a[j] against res2[:, j], thresholded by the new beta_m[j].
            let old_thd_alpha = self.thd_alpha_a[j];
            let xr = data.a.dot(&self.res2.column(j)) + self.a2norm * old_thd_alpha;
            let moments =
                ConditionalMoments::normal_normal(xr, self.a2norm, sigma_g, sigma_ma1, "alpha_a")?;
            let threshold = self.penalty.alpha_threshold(self.beta_m[j]);
            let draw = draw_spike_slab(&mut self.rng, moments, sigma_ma1, threshold, "alpha_a")?;
            self.alpha_a[j] = draw.value;
            self.r3[j] = draw.label;
            shift_residual(self.res2.column_mut(j), data.a, old_thd_alpha, draw.thresholded);
            self.thd_alpha_a[j] = draw.thresholded;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn moments_match_closed_form() {
        let m = ConditionalMoments::normal_normal(12.0, 40.0, 2.0, 0.5, "test").expect("valid");
        assert_relative_eq!(m.variance, 1.0 / (2.0 + 20.0), max_relative = 1e-14);
        assert_relative_eq!(m.mean, m.variance * 12.0 / 2.0, max_relative = 1e-12);
    }

    #[test]
    fn collapsed_variance_is_fatal() {
        let err = ConditionalMoments::normal_normal(1.0, 4.0, 0.0, 1.0, "beta_m").unwrap_err();
        assert!(matches!(err, SamplerError::FatalNumeric { .. }));
    }

    #[test]
    fn strong_signal_selects_right_tail() {
        let mut rng = StdRng::seed_from_u64(21);
        let moments = ConditionalMoments {
            mean: 2.0,
            variance: 0.01,
        };
        for _ in 0..200 {
            let d = draw_spike_slab(&mut rng, moments, 1.0, 0.2, "test").expect("valid");
            assert_eq!(d.label, MixtureLabel::Positive);
            assert!(d.value > 0.2);
            assert_eq!(d.thresholded, d.value);
        }
    }

    #[test]
    fn spike_draw_stays_in_band_but_is_zeroed() {
        let mut rng = StdRng::seed_from_u64(8);
        let moments = ConditionalMoments {
            mean: 0.0,
            variance: 0.001,
        };
        let mut spikes = 0;
        for _ in 0..200 {
            let d = draw_spike_slab(&mut rng, moments, 0.5, 0.4, "test").expect("valid");
            if d.label == MixtureLabel::Spike {
                spikes += 1;
                assert_eq!(d.thresholded, 0.0);
                assert!(d.value.abs() < 0.4);
            }
        }
        assert!(spikes > 190);
    }

    #[test]
    fn failed_spike_draw_falls_back_to_center() {
        let mut rng = StdRng::seed_from_u64(6);
        // An empty band cannot be sampled.
        assert_eq!(spike_latent(&mut rng, 1.0, 0.0, "test"), 0.0);
        let v = spike_latent(&mut rng, 1.0, 0.3, "test");
        assert!(v.abs() < 0.3);
    }

    #[test]
    fn zero_threshold_never_picks_spike() {
        let mut rng = StdRng::seed_from_u64(3);
        let moments = ConditionalMoments {
            mean: 0.0,
            variance: 1.0,
        };
        let w = mixture_log_weights(moments, 1.0, 0.0);
        assert_eq!(w[0], f64::NEG_INFINITY);
        for _ in 0..100 {
            let d = draw_spike_slab(&mut rng, moments, 1.0, 0.0, "test").expect("valid");
            assert!(d.label.is_active());
        }
    }

    #[test]
    fn far_tail_weights_stay_finite() {
        let moments = ConditionalMoments {
            mean: -50.0,
            variance: 0.5,
        };
        let w = mixture_log_weights(moments, 1.0, 0.1);
        assert!(w.iter().all(|v| v.is_finite()));
        assert!(w[2] > w[1]);
    }
}
