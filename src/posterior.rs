use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::data::MediationData;
use crate::probability::log_normal_density;
use crate::recorder::SampleRow;
use crate::sampler::SamplerError;
use crate::state::ModelState;
use crate::types::PenaltyThresholds;

/// Joint Gaussian log likelihood of `Y` and `M` at thresholded coefficients.
///
/// The coefficients are re-thresholded here from the raw values with
/// [`PenaltyThresholds::classify_pair`] rather than taken from the sampler's
/// labels. Diagnostic only.
pub fn joint_log_likelihood(
    data: &MediationData<'_>,
    beta_m: ArrayView1<'_, f64>,
    alpha_a: ArrayView1<'_, f64>,
    beta_a: f64,
    sigma_e: f64,
    sigma_g: f64,
    penalty: &PenaltyThresholds,
) -> f64 {
    let (beta_thd, alpha_thd): (Vec<f64>, Vec<f64>) = beta_m
        .iter()
        .zip(alpha_a.iter())
        .map(|(&b, &a)| penalty.classify_pair(b, a))
        .unzip();
    let sd_e = sigma_e.sqrt();
    let sd_g = sigma_g.sqrt();

    let mut log_y = 0.0;
    let mut log_m = 0.0;
    for (i, row) in data.m.outer_iter().enumerate() {
        let a_i = data.a[i];
        let mut mean_y = beta_a * a_i;
        for (j, &m_ij) in row.iter().enumerate() {
            mean_y += m_ij * beta_thd[j];
            log_m += log_normal_density(alpha_thd[j] * a_i, sd_g, m_ij);
        }
        log_y += log_normal_density(mean_y, sd_e, data.y[i]);
    }
    log_y + log_m
}

impl ModelState<'_> {
    /// Log posterior diagnostic attached to recorded rows.
    pub fn log_posterior(&self) -> f64 {
        joint_log_likelihood(
            &self.data,
            self.beta_m.view(),
            self.alpha_a.view(),
            self.beta_a,
            self.variances.sigma_e,
            self.variances.sigma_g,
            &self.penalty,
        )
    }
}

/// Point estimate with an equal-tailed credible interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalEstimate {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

impl IntervalEstimate {
    pub fn from_draws(draws: &mut [f64], level: f64) -> Self {
        let n = draws.len();
        if n == 0 {
            return Self {
                mean: f64::NAN,
                lower: f64::NAN,
                upper: f64::NAN,
            };
        }
        let mean = draws.iter().sum::<f64>() / n as f64;
        draws.sort_by(f64::total_cmp);
        let tail = (1.0 - level) / 2.0;
        Self {
            mean,
            lower: empirical_quantile(draws, tail),
            upper: empirical_quantile(draws, 1.0 - tail),
        }
    }

    #[inline]
    pub fn excludes_zero(&self) -> bool {
        self.lower > 0.0 || self.upper < 0.0
    }
}

/// Linear-interpolation quantile of already sorted values.
fn empirical_quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Posterior summary for one mediator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediatorSummary {
    pub index: usize,
    /// Thresholded `beta_m[j]` (0 when the label is the spike).
    pub beta_m: IntervalEstimate,
    /// Thresholded `alpha_a[j]`.
    pub alpha_a: IntervalEstimate,
    /// P(r1[j] != spike)
    pub beta_m_inclusion: f64,
    /// P(r3[j] != spike)
    pub alpha_a_inclusion: f64,
    /// P(both active)
    pub joint_inclusion: f64,
    /// Mean of `thd_beta_m[j] * thd_alpha_a[j]`.
    pub mediation_effect: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorSummary {
    pub n_draws: usize,
    pub level: f64,
    pub mediators: Vec<MediatorSummary>,
    pub beta_a: IntervalEstimate,
    pub sigma_e_mean: f64,
    pub sigma_g_mean: f64,
    pub log_posterior_mean: f64,
}

impl PosteriorSummary {
    pub fn from_rows(rows: &[SampleRow], level: f64) -> Result<Self, SamplerError> {
        if rows.is_empty() {
            return Err(SamplerError::InvalidInput(
                "cannot summarize an empty set of draws".to_string(),
            ));
        }
        if !(level > 0.0 && level < 1.0) {
            return Err(SamplerError::InvalidInput(format!(
                "credible level must be in (0, 1), got {level}"
            )));
        }
        let q = rows[0].n_mediators();
        if let Some(bad) = rows.iter().find(|r| r.n_mediators() != q) {
            return Err(SamplerError::InvalidDimension {
                what: "mediators per sample row",
                expected: q,
                found: bad.n_mediators(),
            });
        }
        let n = rows.len() as f64;

        let mediators = (0..q)
            .map(|j| {
                let mut beta: Vec<f64> = rows.iter().map(|r| r.thresholded_beta_m(j)).collect();
                let mut alpha: Vec<f64> = rows.iter().map(|r| r.thresholded_alpha_a(j)).collect();
                let beta_in = rows.iter().filter(|r| r.r1[j].is_active()).count() as f64;
                let alpha_in = rows.iter().filter(|r| r.r3[j].is_active()).count() as f64;
                let joint = rows
                    .iter()
                    .filter(|r| r.r1[j].is_active() && r.r3[j].is_active())
                    .count() as f64;
                let effect = beta
                    .iter()
                    .zip(alpha.iter())
                    .map(|(b, a)| b * a)
                    .sum::<f64>()
                    / n;
                MediatorSummary {
                    index: j,
                    beta_m: IntervalEstimate::from_draws(&mut beta, level),
                    alpha_a: IntervalEstimate::from_draws(&mut alpha, level),
                    beta_m_inclusion: beta_in / n,
                    alpha_a_inclusion: alpha_in / n,
                    joint_inclusion: joint / n,
                    mediation_effect: effect,
                }
            })
            .collect();

        let mut beta_a: Vec<f64> = rows.iter().map(|r| r.beta_a).collect();
        let mean_of = |f: fn(&SampleRow) -> f64| rows.iter().map(f).sum::<f64>() / n;
        Ok(Self {
            n_draws: rows.len(),
            level,
            mediators,
            beta_a: IntervalEstimate::from_draws(&mut beta_a, level),
            sigma_e_mean: mean_of(|r| r.sigma_e),
            sigma_g_mean: mean_of(|r| r.sigma_g),
            log_posterior_mean: mean_of(|r| r.log_posterior),
        })
    }
}
