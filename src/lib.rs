#![deny(dead_code)]
#![deny(unused_imports)]
#![allow(non_snake_case)]

pub mod conditional;
pub mod data;
pub mod generative;
pub mod hyper;
pub mod posterior;
pub mod probability;
pub mod recorder;
pub mod residual;
pub mod sampler;
pub mod state;
pub mod types;

pub use data::{MediationData, standardize_columns};
pub use generative::{MediationTruth, SimulatedData, permute_exposure, simulate_mediation_data};
pub use posterior::{IntervalEstimate, MediatorSummary, PosteriorSummary, joint_log_likelihood};
pub use recorder::{MemorySink, RunIdentifiers, SampleArchive, SampleRow, SampleSink};
pub use sampler::{
    ChainOutcome, FinalParameters, IndependentChain, MediationSampler, SamplerConfig,
    SamplerError, derive_chain_seed, run_chain, run_independent_chains,
};
pub use state::{InitialCoefficients, ModelState};
pub use types::{Hyperpriors, MixtureLabel, PenaltyThresholds, VarianceState};
