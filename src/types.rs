use serde::{Deserialize, Serialize};

use crate::sampler::SamplerError;

/// Spike/slab component selected for one coefficient in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MixtureLabel {
    /// Point mass at zero: the thresholded value is exactly 0.
    Spike,
    /// Active with a value above the positive threshold.
    Positive,
    /// Active with a value below the negative threshold.
    Negative,
}

impl MixtureLabel {
    /// Component index in draw order: spike, right tail, left tail.
    #[inline]
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Spike),
            1 => Some(Self::Positive),
            2 => Some(Self::Negative),
            _ => None,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Spike => 0,
            Self::Positive => 1,
            Self::Negative => 2,
        }
    }

    /// Numeric code written to the sample table.
    #[inline]
    pub fn code(self) -> f64 {
        self.index() as f64
    }

    #[inline]
    pub fn is_active(self) -> bool {
        self != Self::Spike
    }

    /// Label implied by an already-thresholded value.
    #[inline]
    pub fn of_thresholded(value: f64) -> Self {
        if value > 0.0 {
            Self::Positive
        } else if value < 0.0 {
            Self::Negative
        } else {
            Self::Spike
        }
    }
}

/// Penalty thresholds controlling spike classification.
///
/// `lambda1` and `lambda2` are the marginal thresholds for `beta_m` and
/// `alpha_a`; `lambda0` bounds the product `|beta_m[j] * alpha_a[j]|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyThresholds {
    pub lambda0: f64,
    pub lambda1: f64,
    pub lambda2: f64,
}

impl PenaltyThresholds {
    pub fn new(lambda0: f64, lambda1: f64, lambda2: f64) -> Result<Self, SamplerError> {
        let out = Self {
            lambda0,
            lambda1,
            lambda2,
        };
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> Result<(), SamplerError> {
        for (name, v) in [
            ("lambda0", self.lambda0),
            ("lambda1", self.lambda1),
            ("lambda2", self.lambda2),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(SamplerError::InvalidInput(format!(
                    "{name} must be finite and non-negative, got {v}"
                )));
            }
        }
        Ok(())
    }

    /// Threshold for `beta_m[j]` given the current `alpha_a[j]`.
    #[inline]
    pub fn beta_threshold(&self, alpha: f64) -> f64 {
        adaptive_threshold(alpha, self.lambda1, self.lambda0)
    }

    /// Threshold for `alpha_a[j]` given the current `beta_m[j]`.
    #[inline]
    pub fn alpha_threshold(&self, beta: f64) -> f64 {
        adaptive_threshold(beta, self.lambda2, self.lambda0)
    }

    /// Thresholded `(beta_m[j], alpha_a[j])` pair under the classification rule.
    ///
    /// A coordinate survives when it clears its marginal threshold or when the
    /// product with its partner clears `lambda0`. The residual initialization
    /// and the posterior evaluator both go through here so the comparisons are
    /// bit-identical.
    #[inline]
    pub fn classify_pair(&self, beta: f64, alpha: f64) -> (f64, f64) {
        let product = (beta * alpha).abs();
        let beta_thd = if beta.abs() >= self.lambda1 || product >= self.lambda0 {
            beta
        } else {
            0.0
        };
        let alpha_thd = if alpha.abs() >= self.lambda2 || product >= self.lambda0 {
            alpha
        } else {
            0.0
        };
        (beta_thd, alpha_thd)
    }
}

/// `min(marginal, lambda0 / |partner|)`, falling back to `marginal` when the
/// partner is exactly zero.
#[inline]
pub fn adaptive_threshold(partner: f64, marginal: f64, lambda0: f64) -> f64 {
    if partner != 0.0 {
        marginal.min(lambda0 / partner.abs())
    } else {
        marginal
    }
}

/// Inverse-gamma shape/rate pairs for every variance prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperpriors {
    /// sigma_a ~ IG(ha, la)
    #[serde(default = "default_variance_shape")]
    pub ha: f64,
    #[serde(default = "default_variance_rate")]
    pub la: f64,
    /// sigma_e ~ IG(he, le)
    #[serde(default = "default_variance_shape")]
    pub he: f64,
    #[serde(default = "default_variance_rate")]
    pub le: f64,
    /// sigma_g ~ IG(hg, lg)
    #[serde(default = "default_variance_shape")]
    pub hg: f64,
    #[serde(default = "default_variance_rate")]
    pub lg: f64,
    /// sigma_m1 ~ IG(km1, lm1)
    #[serde(default = "default_shrinkage_shape")]
    pub km1: f64,
    #[serde(default = "default_shrinkage_rate")]
    pub lm1: f64,
    /// sigma_ma1 ~ IG(kma1, lma1)
    #[serde(default = "default_shrinkage_shape")]
    pub kma1: f64,
    #[serde(default = "default_shrinkage_rate")]
    pub lma1: f64,
}

fn default_variance_shape() -> f64 {
    2.0
}

fn default_variance_rate() -> f64 {
    1.0
}

fn default_shrinkage_shape() -> f64 {
    1.1
}

fn default_shrinkage_rate() -> f64 {
    0.09
}

impl Default for Hyperpriors {
    fn default() -> Self {
        Self {
            ha: default_variance_shape(),
            la: default_variance_rate(),
            he: default_variance_shape(),
            le: default_variance_rate(),
            hg: default_variance_shape(),
            lg: default_variance_rate(),
            km1: default_shrinkage_shape(),
            lm1: default_shrinkage_rate(),
            kma1: default_shrinkage_shape(),
            lma1: default_shrinkage_rate(),
        }
    }
}

impl Hyperpriors {
    /// Defaults with the shrinkage rates taken positionally from an auxiliary
    /// vector: `overrides[0]` is `lm1`, `overrides[1]` is `lma1`.
    pub fn with_scale_overrides(overrides: &[f64]) -> Result<Self, SamplerError> {
        if overrides.len() < 2 {
            return Err(SamplerError::InvalidDimension {
                what: "prior scale overrides",
                expected: 2,
                found: overrides.len(),
            });
        }
        let out = Self {
            lm1: overrides[0],
            lma1: overrides[1],
            ..Self::default()
        };
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> Result<(), SamplerError> {
        let pairs = [
            ("ha", self.ha),
            ("la", self.la),
            ("he", self.he),
            ("le", self.le),
            ("hg", self.hg),
            ("lg", self.lg),
            ("km1", self.km1),
            ("lm1", self.lm1),
            ("kma1", self.kma1),
            ("lma1", self.lma1),
        ];
        for (name, v) in pairs {
            if !v.is_finite() || v <= 0.0 {
                return Err(SamplerError::InvalidInput(format!(
                    "hyperprior {name} must be finite and positive, got {v}"
                )));
            }
        }
        // The shrinkage variances start at their prior means.
        if self.km1 <= 1.0 || self.kma1 <= 1.0 {
            return Err(SamplerError::InvalidInput(format!(
                "shrinkage shapes must exceed 1 for a finite prior mean (km1={}, kma1={})",
                self.km1, self.kma1
            )));
        }
        Ok(())
    }

    /// Prior mean of sigma_m1.
    #[inline]
    pub fn beta_m_prior_mean(&self) -> f64 {
        self.lm1 / (self.km1 - 1.0)
    }

    /// Prior mean of sigma_ma1.
    #[inline]
    pub fn alpha_a_prior_mean(&self) -> f64 {
        self.lma1 / (self.kma1 - 1.0)
    }
}

/// Current values of every variance hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceState {
    /// Outcome noise variance.
    pub sigma_e: f64,
    /// Mediator noise variance.
    pub sigma_g: f64,
    /// Prior variance of beta_a.
    pub sigma_a: f64,
    /// Pooled prior variance of beta_m.
    pub sigma_m1: f64,
    /// Pooled prior variance of alpha_a.
    pub sigma_ma1: f64,
}

impl VarianceState {
    pub fn all_positive(&self) -> bool {
        [
            self.sigma_e,
            self.sigma_g,
            self.sigma_a,
            self.sigma_m1,
            self.sigma_ma1,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0)
    }
}
