use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::sampler::SamplerError;

/// Read-only views of the observations for one chain.
///
/// `m` is `n x q` with one column per candidate mediator.
#[derive(Debug, Clone, Copy)]
pub struct MediationData<'a> {
    pub y: ArrayView1<'a, f64>,
    pub a: ArrayView1<'a, f64>,
    pub m: ArrayView2<'a, f64>,
}

impl<'a> MediationData<'a> {
    pub fn new(
        y: ArrayView1<'a, f64>,
        a: ArrayView1<'a, f64>,
        m: ArrayView2<'a, f64>,
    ) -> Result<Self, SamplerError> {
        let n = y.len();
        if n == 0 {
            return Err(SamplerError::InvalidInput(
                "outcome vector is empty".to_string(),
            ));
        }
        if a.len() != n {
            return Err(SamplerError::InvalidDimension {
                what: "exposure length",
                expected: n,
                found: a.len(),
            });
        }
        if m.nrows() != n {
            return Err(SamplerError::InvalidDimension {
                what: "mediator matrix rows",
                expected: n,
                found: m.nrows(),
            });
        }
        if m.ncols() == 0 {
            return Err(SamplerError::InvalidInput(
                "mediator matrix has no columns".to_string(),
            ));
        }
        if let Some(i) = y.iter().position(|v| !v.is_finite()) {
            return Err(SamplerError::InvalidInput(format!(
                "outcome contains a non-finite value at row {i}"
            )));
        }
        if let Some(i) = a.iter().position(|v| !v.is_finite()) {
            return Err(SamplerError::InvalidInput(format!(
                "exposure contains a non-finite value at row {i}"
            )));
        }
        if m.iter().any(|v| !v.is_finite()) {
            return Err(SamplerError::InvalidInput(
                "mediator matrix contains non-finite values".to_string(),
            ));
        }
        Ok(Self { y, a, m })
    }

    #[inline]
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    #[inline]
    pub fn n_mediators(&self) -> usize {
        self.m.ncols()
    }

    /// Checks a per-mediator vector against `q`.
    pub fn check_mediator_len(&self, what: &'static str, len: usize) -> Result<(), SamplerError> {
        if len != self.n_mediators() {
            return Err(SamplerError::InvalidDimension {
                what,
                expected: self.n_mediators(),
                found: len,
            });
        }
        Ok(())
    }

    /// Marginal least-squares starting values `(beta_m, alpha_a)`.
    ///
    /// `alpha_a[j] = A'M_j / A'A` and `beta_m[j] = M_j'Y / M_j'M_j`, with 0 for
    /// a column of zeros.
    pub fn marginal_estimates(&self) -> (Vec<f64>, Vec<f64>) {
        let a2 = self.a.dot(&self.a);
        let mut beta_m = Vec::with_capacity(self.n_mediators());
        let mut alpha_a = Vec::with_capacity(self.n_mediators());
        for col in self.m.axis_iter(Axis(1)) {
            let m2 = col.dot(&col);
            beta_m.push(if m2 > 0.0 { col.dot(&self.y) / m2 } else { 0.0 });
            alpha_a.push(if a2 > 0.0 { self.a.dot(&col) / a2 } else { 0.0 });
        }
        (beta_m, alpha_a)
    }
}

/// Centers every column and scales it to unit population standard deviation.
pub fn standardize_columns(x: &mut Array2<f64>) -> Result<(), SamplerError> {
    let n = x.nrows();
    if n == 0 {
        return Err(SamplerError::InvalidInput(
            "cannot standardize an empty matrix".to_string(),
        ));
    }
    for (j, mut col) in x.axis_iter_mut(Axis(1)).enumerate() {
        let mean = col.sum() / n as f64;
        let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
        let sd = var.sqrt();
        if !(sd.is_finite() && sd > 0.0) {
            return Err(SamplerError::InvalidInput(format!(
                "column {j} is constant and cannot be standardized"
            )));
        }
        col.mapv_inplace(|v| (v - mean) / sd);
    }
    Ok(())
}
