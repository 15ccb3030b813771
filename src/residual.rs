//! Residual bookkeeping.
//!
//! `res1 = Y - beta_a A - M thd_beta_m` and `res2[:, j] = M_j - A thd_alpha_a[j]`
//! are built from scratch once. Every later change of a thresholded
//! coefficient by `delta` is folded in as `-delta` times its predictor column,
//! which keeps each coordinate update O(n).

use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};

use crate::state::ModelState;
use crate::types::MixtureLabel;

/// `residual += (old - new) * column`.
#[inline]
pub(crate) fn shift_residual(
    mut residual: ArrayViewMut1<'_, f64>,
    column: ArrayView1<'_, f64>,
    old: f64,
    new: f64,
) {
    let delta = old - new;
    if delta != 0.0 {
        residual.scaled_add(delta, &column);
    }
}

impl ModelState<'_> {
    /// Rebuilds thresholded coefficients, labels and both residuals from the
    /// current raw coefficients. Only valid at construction: mid-run it would
    /// relabel spike draws.
    pub(crate) fn recompute_residuals(&mut self) {
        for j in 0..self.beta_m.len() {
            let (b, a) = self.penalty.classify_pair(self.beta_m[j], self.alpha_a[j]);
            self.thd_beta_m[j] = b;
            self.thd_alpha_a[j] = a;
            self.r1[j] = MixtureLabel::of_thresholded(b);
            self.r3[j] = MixtureLabel::of_thresholded(a);
        }
        let (res1, res2) = self.scratch_residuals();
        self.res1 = res1;
        self.res2 = res2;
    }

    /// Residuals implied by the current `beta_a` and thresholded coefficients,
    /// computed without touching the maintained copies.
    pub fn scratch_residuals(&self) -> (Array1<f64>, Array2<f64>) {
        let data = self.data;
        let mut res1 = &data.y - &(&data.a * self.beta_a);
        res1 -= &data.m.dot(&self.thd_beta_m);

        let mut res2 = data.m.to_owned();
        for (mut col, &thd) in res2.axis_iter_mut(Axis(1)).zip(self.thd_alpha_a.iter()) {
            col.scaled_add(-thd, &data.a);
        }
        (res1, res2)
    }

    /// Largest relative gap between the maintained residuals and a fresh
    /// recomputation, scaled by `max(1, |fresh|)` elementwise.
    pub fn residual_drift(&self) -> f64 {
        let (res1, res2) = self.scratch_residuals();
        let gap = |kept: f64, fresh: f64| (kept - fresh).abs() / fresh.abs().max(1.0);
        let d1 = self
            .res1
            .iter()
            .zip(res1.iter())
            .map(|(&k, &f)| gap(k, f))
            .fold(0.0_f64, f64::max);
        let d2 = self
            .res2
            .iter()
            .zip(res2.iter())
            .map(|(&k, &f)| gap(k, f))
            .fold(0.0_f64, f64::max);
        d1.max(d2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MediationData;
    use crate::state::InitialCoefficients;
    use crate::types::{Hyperpriors, PenaltyThresholds};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn scratch_residuals_match_definition() {
        let y = array![1.0, 2.0, -1.0];
        let a = array![0.5, -1.0, 2.0];
        let m = array![[1.0, 0.0], [0.0, 1.0], [2.0, -1.0]];
        let data = MediationData::new(y.view(), a.view(), m.view()).expect("valid");
        let penalty = PenaltyThresholds::new(0.0, 0.0, 0.0).expect("valid");
        let init = InitialCoefficients::new(array![0.5, -2.0], array![1.5, 0.25]);
        let state =
            ModelState::new(data, init, Hyperpriors::default(), penalty, 11).expect("valid");
        let ba = state.beta_a();
        for i in 0..3 {
            let expected = y[i] - ba * a[i] - (m[[i, 0]] * 0.5 + m[[i, 1]] * -2.0);
            assert_abs_diff_eq!(state.outcome_residual()[i], expected, epsilon = 1e-12);
            assert_abs_diff_eq!(
                state.mediator_residuals()[[i, 0]],
                m[[i, 0]] - 1.5 * a[i],
                epsilon = 1e-12
            );
            assert_abs_diff_eq!(
                state.mediator_residuals()[[i, 1]],
                m[[i, 1]] - 0.25 * a[i],
                epsilon = 1e-12
            );
        }
        assert_eq!(state.residual_drift(), 0.0);
    }

    #[test]
    fn shift_applies_rank_one_correction() {
        let mut r = array![1.0, 1.0, 1.0];
        let col = array![1.0, 2.0, 3.0];
        shift_residual(r.view_mut(), col.view(), 0.5, 0.0);
        assert_eq!(r, array![1.5, 2.0, 2.5]);
        shift_residual(r.view_mut(), col.view(), 0.0, 0.0);
        assert_eq!(r, array![1.5, 2.0, 2.5]);
    }
}
