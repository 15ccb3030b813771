use rand::distr::weighted::WeightedIndex;
use rand::{Rng, RngExt};
use rand_distr::{Distribution, Gamma, Normal, StandardNormal};
use statrs::function::erf::{erf, erfc};
use std::f64::consts::{PI, SQRT_2};

use crate::sampler::SamplerError;

/// Proposals tried by a truncated-normal sampler before it gives up and
/// returns NaN.
const MAX_PROPOSALS: usize = 10_000;

/// Below this standardized lower bound plain rejection from the normal accepts
/// at least a third of the proposals.
const NAIVE_REJECTION_CUTOFF: f64 = 0.45;

/// Standard normal PDF φ(x).
#[inline]
pub fn normal_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// log N(value | mean, sd²).
#[inline]
pub fn log_normal_density(mean: f64, sd: f64, value: f64) -> f64 {
    let z = (value - mean) / sd;
    -(sd * (2.0 * PI).sqrt()).ln() - 0.5 * z * z
}

/// Upper tail P(Z > z) of the standard normal.
#[inline]
pub fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / SQRT_2)
}

/// log P(Z > z), finite for every finite `z`.
///
/// Uses `erfc` while it is representable and the Mills-ratio expansion once it
/// underflows.
pub fn log_normal_sf(z: f64) -> f64 {
    if z == f64::INFINITY {
        return f64::NEG_INFINITY;
    }
    let p = normal_sf(z);
    if p > 0.0 {
        return p.ln();
    }
    let z2 = z * z;
    let series = 1.0 - 1.0 / z2 + 3.0 / (z2 * z2) - 15.0 / (z2 * z2 * z2);
    -0.5 * z2 - z.ln() - 0.5 * (2.0 * PI).ln() + series.ln()
}

/// log P(|Z| < t) for the standard normal; −∞ at `t = 0`.
#[inline]
pub fn log_central_mass(t: f64) -> f64 {
    if t <= 0.0 {
        return f64::NEG_INFINITY;
    }
    erf(t / SQRT_2).ln()
}

#[inline]
fn open_unit<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // (0, 1]
    1.0 - rng.random::<f64>()
}

/// Standard normal restricted to `[alpha, ∞)`.
fn standard_lower_tail<R: Rng + ?Sized>(rng: &mut R, alpha: f64) -> f64 {
    if alpha < NAIVE_REJECTION_CUTOFF {
        for _ in 0..MAX_PROPOSALS {
            let z: f64 = StandardNormal.sample(rng);
            if z >= alpha {
                return z;
            }
        }
        return f64::NAN;
    }
    // Robert (1995): translated exponential proposal with the optimal rate.
    let rate = 0.5 * (alpha + (alpha * alpha + 4.0).sqrt());
    for _ in 0..MAX_PROPOSALS {
        let z = alpha - open_unit(rng).ln() / rate;
        let accept = (-0.5 * (z - rate) * (z - rate)).exp();
        if rng.random::<f64>() <= accept {
            return z;
        }
    }
    f64::NAN
}

/// Standard normal restricted to `[a, b]`.
fn standard_interval<R: Rng + ?Sized>(rng: &mut R, a: f64, b: f64) -> f64 {
    if !(a < b) {
        return f64::NAN;
    }
    if b <= 0.0 {
        return -standard_interval(rng, -b, -a);
    }
    if a < 0.0 {
        if b - a >= (2.0 * PI).sqrt() {
            for _ in 0..MAX_PROPOSALS {
                let z: f64 = StandardNormal.sample(rng);
                if z >= a && z <= b {
                    return z;
                }
            }
            return f64::NAN;
        }
        for _ in 0..MAX_PROPOSALS {
            let z = a + (b - a) * rng.random::<f64>();
            if rng.random::<f64>() <= (-0.5 * z * z).exp() {
                return z;
            }
        }
        return f64::NAN;
    }

    // 0 <= a < b: uniform proposal on narrow intervals, exponential otherwise.
    let root = (a * a + 4.0).sqrt();
    let uniform_width = 2.0 * 0.5_f64.exp() / (a + root) * ((a * a - a * root) / 4.0).exp();
    if b - a <= uniform_width {
        for _ in 0..MAX_PROPOSALS {
            let z = a + (b - a) * rng.random::<f64>();
            if rng.random::<f64>() <= (0.5 * (a * a - z * z)).exp() {
                return z;
            }
        }
        return f64::NAN;
    }
    for _ in 0..MAX_PROPOSALS {
        let z = standard_lower_tail(rng, a);
        if z.is_nan() {
            return z;
        }
        if z <= b {
            return z;
        }
    }
    f64::NAN
}

/// N(mean, sd²) restricted to `(lower, ∞)`. NaN on failure.
pub fn sample_truncated_below<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64, lower: f64) -> f64 {
    if !(sd.is_finite() && sd > 0.0) {
        return f64::NAN;
    }
    mean + sd * standard_lower_tail(rng, (lower - mean) / sd)
}

/// N(mean, sd²) restricted to `(−∞, upper)`. NaN on failure.
pub fn sample_truncated_above<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64, upper: f64) -> f64 {
    -sample_truncated_below(rng, -mean, sd, -upper)
}

/// N(mean, sd²) restricted to `(lower, upper)`. NaN on failure.
pub fn sample_truncated_between<R: Rng + ?Sized>(
    rng: &mut R,
    mean: f64,
    sd: f64,
    lower: f64,
    upper: f64,
) -> f64 {
    if !(sd.is_finite() && sd > 0.0) {
        return f64::NAN;
    }
    mean + sd * standard_interval(rng, (lower - mean) / sd, (upper - mean) / sd)
}

/// Normal draw with a checked standard deviation.
pub fn sample_normal<R: Rng + ?Sized>(
    rng: &mut R,
    mean: f64,
    sd: f64,
    context: &str,
) -> Result<f64, SamplerError> {
    if !(sd.is_finite() && sd > 0.0) || !mean.is_finite() {
        return Err(SamplerError::numeric(
            format!("{context} (normal sd)"),
            sd,
        ));
    }
    let dist = Normal::new(mean, sd)
        .map_err(|_| SamplerError::numeric(format!("{context} (normal sd)"), sd))?;
    Ok(dist.sample(rng))
}

/// Draw from IG(shape, rate) as the reciprocal of a Gamma(shape, 1/rate) draw.
pub fn sample_inverse_gamma<R: Rng + ?Sized>(
    rng: &mut R,
    shape: f64,
    rate: f64,
    context: &str,
) -> Result<f64, SamplerError> {
    if !(shape.is_finite() && shape > 0.0) {
        return Err(SamplerError::numeric(format!("{context} (shape)"), shape));
    }
    if !(rate.is_finite() && rate > 0.0) {
        return Err(SamplerError::numeric(format!("{context} (rate)"), rate));
    }
    let dist = Gamma::new(shape, 1.0 / rate)
        .map_err(|_| SamplerError::numeric(format!("{context} (gamma)"), rate))?;
    let g: f64 = dist.sample(rng);
    let v = 1.0 / g;
    if !(v.is_finite() && v > 0.0) {
        return Err(SamplerError::numeric(context.to_string(), v));
    }
    Ok(v)
}

/// Index drawn with probability proportional to `exp(log_weights[k])`.
///
/// The maximum is subtracted before exponentiating. Individual −∞ weights are
/// allowed and never selected; NaN weights or an all −∞ vector are fatal.
pub fn sample_log_weights<R: Rng + ?Sized>(
    rng: &mut R,
    log_weights: &[f64],
    context: &str,
) -> Result<usize, SamplerError> {
    if let Some(&w) = log_weights.iter().find(|w| w.is_nan()) {
        return Err(SamplerError::numeric(
            format!("{context} (mixture weight)"),
            w,
        ));
    }
    let max = log_weights
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(SamplerError::numeric(
            format!("{context} (largest mixture weight)"),
            max,
        ));
    }
    let weights: Vec<f64> = log_weights.iter().map(|&lw| (lw - max).exp()).collect();
    let dist = WeightedIndex::new(&weights).map_err(|e| {
        SamplerError::numeric(format!("{context} (mixture weights: {e})"), max)
    })?;
    Ok(dist.sample(rng))
}
