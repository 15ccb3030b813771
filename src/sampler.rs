//! Driver loop for the thresholded spike-and-slab mediation Gibbs sampler.
//!
//! One chain is a [`MediationSampler`]: it owns a [`ModelState`] (and with it
//! the chain's random stream) and repeatedly applies the transition kernel
//!
//! 1. noise variances `sigma_e`, `sigma_g` from the current residuals,
//! 2. the coupled per-mediator spike/slab sweep over `j = 0..q`,
//! 3. the direct effect `beta_a`,
//! 4. the prior variances `sigma_a`, `sigma_m1`, `sigma_ma1`,
//!
//! in exactly that order, emitting one row to a [`SampleSink`] on every
//! retained iteration. Independent chains share nothing mutable and can run in
//! parallel through [`run_independent_chains`].

use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::MediationData;
use crate::recorder::{MemorySink, SampleRow, SampleSink};
use crate::state::{InitialCoefficients, ModelState};
use crate::types::{Hyperpriors, MixtureLabel, PenaltyThresholds, VarianceState};

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Dimension mismatch for {what}: expected {expected}, found {found}")]
    InvalidDimension {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Degenerate posterior in {context} (value {value:e})")]
    FatalNumeric { context: String, value: f64 },

    #[error("Failed to write sample archive '{path}': {source}")]
    ArchiveIo {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SamplerError {
    pub(crate) fn numeric(context: impl Into<String>, value: f64) -> Self {
        Self::FatalNumeric {
            context: context.into(),
            value,
        }
    }
}

/// Run-length, thinning and logging settings for one chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Iterations with index `<= burn_in` are never recorded.
    pub burn_in: usize,
    /// Iterations run after burn-in; the chain runs `burn_in + n_iter` in total.
    pub n_iter: usize,
    /// Keep every `thinning`-th post-burn-in iteration.
    #[serde(default = "default_thinning")]
    pub thinning: usize,
    /// Rows buffered by an archive before it is flushed to storage.
    #[serde(default = "default_archive_capacity")]
    pub archive_capacity: usize,
    #[serde(default = "default_progress_log_every")]
    pub progress_log_every: usize,
    #[serde(default = "default_shrinkage_log_every")]
    pub shrinkage_log_every: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_thinning() -> usize {
    10
}

fn default_archive_capacity() -> usize {
    499
}

fn default_progress_log_every() -> usize {
    50_000
}

fn default_shrinkage_log_every() -> usize {
    10_000
}

fn default_seed() -> u64 {
    42
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            burn_in: 5_000,
            n_iter: 20_000,
            thinning: default_thinning(),
            archive_capacity: default_archive_capacity(),
            progress_log_every: default_progress_log_every(),
            shrinkage_log_every: default_shrinkage_log_every(),
            seed: default_seed(),
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), SamplerError> {
        if self.thinning == 0 {
            return Err(SamplerError::InvalidInput(
                "thinning interval must be at least 1".to_string(),
            ));
        }
        if self.archive_capacity == 0 {
            return Err(SamplerError::InvalidInput(
                "archive capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn total_iterations(&self) -> usize {
        self.burn_in + self.n_iter
    }

    #[inline]
    pub fn is_retained(&self, iteration: usize) -> bool {
        iteration > self.burn_in && iteration % self.thinning == 0
    }

    /// Number of rows a full run emits.
    pub fn expected_rows(&self) -> usize {
        (0..self.total_iterations())
            .filter(|&it| self.is_retained(it))
            .count()
    }
}

/// Parameter values at the end of a chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalParameters {
    pub beta_m: Array1<f64>,
    pub alpha_a: Array1<f64>,
    pub beta_a: f64,
    pub r1: Vec<MixtureLabel>,
    pub r3: Vec<MixtureLabel>,
    pub variances: VarianceState,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainOutcome {
    pub final_parameters: FinalParameters,
    pub iterations_completed: usize,
    pub rows_recorded: usize,
    pub stopped_early: bool,
}

/// A single chain: model state plus run configuration.
pub struct MediationSampler<'a> {
    state: ModelState<'a>,
    config: SamplerConfig,
    iteration: usize,
}

impl<'a> MediationSampler<'a> {
    pub fn new(
        data: MediationData<'a>,
        init: InitialCoefficients,
        priors: Hyperpriors,
        penalty: PenaltyThresholds,
        config: SamplerConfig,
    ) -> Result<Self, SamplerError> {
        config.validate()?;
        let state = ModelState::new(data, init, priors, penalty, config.seed)?;
        Ok(Self {
            state,
            config,
            iteration: 0,
        })
    }

    pub fn state(&self) -> &ModelState<'a> {
        &self.state
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Index of the next iteration to run.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Applies one full transition and returns the row to record, if this
    /// iteration is retained.
    pub fn step(&mut self) -> Result<Option<SampleRow>, SamplerError> {
        let it = self.iteration;
        self.state.update_noise_variances()?;
        self.state.update_mediators()?;
        self.state.update_direct_effect()?;
        self.state.update_direct_effect_variance()?;
        let (beta_m_sum, alpha_a_sum) = self.state.update_shrinkage_variances()?;
        self.log_progress(it, beta_m_sum, alpha_a_sum);
        self.iteration += 1;

        if self.config.is_retained(it) {
            Ok(Some(self.state.sample_row()))
        } else {
            Ok(None)
        }
    }

    /// Runs the remaining iterations, streaming retained rows into `sink`.
    ///
    /// `stop` is checked between iterations; once set, the sink is finished and
    /// the chain returns with `stopped_early`.
    pub fn run<S: SampleSink + ?Sized>(
        mut self,
        sink: &mut S,
        stop: Option<&AtomicBool>,
    ) -> Result<ChainOutcome, SamplerError> {
        let total = self.config.total_iterations();
        let mut rows = 0usize;
        let mut stopped_early = false;
        while self.iteration < total {
            if stop.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                log::info!(
                    "chain stopped at iteration {} of {} ({} rows recorded)",
                    self.iteration,
                    total,
                    rows
                );
                stopped_early = true;
                break;
            }
            if let Some(row) = self.step()? {
                sink.record(&row)?;
                rows += 1;
            }
        }
        sink.finish()?;
        Ok(ChainOutcome {
            final_parameters: self.state.final_parameters(),
            iterations_completed: self.iteration,
            rows_recorded: rows,
            stopped_early,
        })
    }

    fn log_progress(&self, it: usize, beta_m_sum: f64, alpha_a_sum: f64) {
        let v = self.state.variances();
        if self.config.progress_log_every > 0 && it % self.config.progress_log_every == 0 {
            log::info!(
                "iter {it} sigma_e {:.3e} sigma_g {:.3e} sigma_a {:.3e}",
                v.sigma_e,
                v.sigma_g,
                v.sigma_a
            );
        }
        if self.config.shrinkage_log_every > 0 && it % self.config.shrinkage_log_every == 0 {
            log::debug!(
                "iter {it} sigma_m1 {:.3e} sigma_ma1 {:.3e} sum(beta_m^2)/2 {:.3e} sum(alpha_a^2)/2 {:.3e}",
                v.sigma_m1,
                v.sigma_ma1,
                beta_m_sum,
                alpha_a_sum
            );
        }
    }
}

/// Runs one chain to completion.
pub fn run_chain<S: SampleSink + ?Sized>(
    data: MediationData<'_>,
    init: InitialCoefficients,
    priors: Hyperpriors,
    penalty: PenaltyThresholds,
    config: SamplerConfig,
    sink: &mut S,
    stop: Option<&AtomicBool>,
) -> Result<ChainOutcome, SamplerError> {
    MediationSampler::new(data, init, priors, penalty, config)?.run(sink, stop)
}

/// SplitMix64 finalizer over `(base, index)`: distinct chains get
/// decorrelated seeds from one user seed.
pub fn derive_chain_seed(base: u64, index: u64) -> u64 {
    let mut z = base.wrapping_add(index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Result of one chain in [`run_independent_chains`].
#[derive(Clone, Debug)]
pub struct IndependentChain {
    pub index: usize,
    pub outcome: ChainOutcome,
    pub rows: Vec<SampleRow>,
}

/// Runs `n_chains` independent chains on the same data in parallel.
///
/// Chain `k` uses seed `derive_chain_seed(config.seed, k)` and its own
/// in-memory sink.
pub fn run_independent_chains(
    data: MediationData<'_>,
    init: &InitialCoefficients,
    priors: Hyperpriors,
    penalty: PenaltyThresholds,
    config: &SamplerConfig,
    n_chains: usize,
    stop: Option<&AtomicBool>,
) -> Result<Vec<IndependentChain>, SamplerError> {
    (0..n_chains)
        .into_par_iter()
        .map(|index| {
            let chain_config = SamplerConfig {
                seed: derive_chain_seed(config.seed, index as u64),
                ..config.clone()
            };
            let mut sink = MemorySink::default();
            let outcome = run_chain(
                data,
                init.clone(),
                priors,
                penalty,
                chain_config,
                &mut sink,
                stop,
            )?;
            Ok(IndependentChain {
                index,
                outcome,
                rows: sink.into_rows(),
            })
        })
        .collect()
}
