use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use sparse_mediation::{
    Hyperpriors, InitialCoefficients, MediationData, MediationTruth, MemorySink, PenaltyThresholds,
    PosteriorSummary, SamplerConfig, derive_chain_seed, permute_exposure, run_chain,
    simulate_mediation_data,
};

fn truth() -> MediationTruth {
    MediationTruth {
        beta_m: vec![0.5, 0.0, 0.4, 0.0, 0.0],
        alpha_a: vec![0.6, 0.0, 0.5, 0.0, 0.0],
        beta_a: 0.3,
        sigma_m: 1.0,
        sigma_y: 1.0,
    }
}

// lambda0 / |partner| sits below the marginal thresholds for the active
// mediators, so their cutoffs come from the product rule.
fn penalty() -> PenaltyThresholds {
    PenaltyThresholds::new(0.04, 0.15, 0.15).expect("valid thresholds")
}

fn summarize(y: &Array1<f64>, a: &Array1<f64>, m: &Array2<f64>, seed: u64) -> PosteriorSummary {
    let data = MediationData::new(y.view(), a.view(), m.view()).expect("valid data");
    let config = SamplerConfig {
        burn_in: 5_000,
        n_iter: 20_000,
        thinning: 10,
        seed,
        ..SamplerConfig::default()
    };
    let mut sink = MemorySink::default();
    let outcome = run_chain(
        data,
        InitialCoefficients::marginal(&data),
        Hyperpriors::default(),
        penalty(),
        config.clone(),
        &mut sink,
        None,
    )
    .expect("chain");
    assert_eq!(outcome.iterations_completed, 25_000);
    assert_eq!(outcome.rows_recorded, config.expected_rows());
    PosteriorSummary::from_rows(sink.rows(), 0.95).expect("summary")
}

#[test]
fn recovers_sparse_mediation_structure() {
    let mut rng = StdRng::seed_from_u64(2024);
    let sim = simulate_mediation_data(&truth(), 100, &mut rng).expect("valid truth");
    let summary = summarize(&sim.y, &sim.a, &sim.m, 17);

    let p = penalty();
    for (j, alpha) in [(0, 0.6), (2, 0.5)] {
        assert!(p.beta_threshold(alpha) < p.lambda1);
        let active = &summary.mediators[j];
        assert!(active.beta_m.excludes_zero(), "beta_m[{j}] interval {:?}", active.beta_m);
        assert!(active.alpha_a.excludes_zero(), "alpha_a[{j}] interval {:?}", active.alpha_a);
        assert!(active.joint_inclusion > 0.9, "joint inclusion {}", active.joint_inclusion);
        assert!(active.mediation_effect > 0.05, "effect {}", active.mediation_effect);
    }

    let weakest_active = summary.mediators[0]
        .joint_inclusion
        .min(summary.mediators[2].joint_inclusion);
    for j in [1, 3, 4] {
        let null = &summary.mediators[j];
        assert!(null.beta_m.mean.abs() < 0.08, "beta_m[{j}] mean {}", null.beta_m.mean);
        assert!(null.mediation_effect.abs() < 0.05, "effect[{j}] {}", null.mediation_effect);
        assert!(null.joint_inclusion < weakest_active);
    }

    assert!(
        (summary.beta_a.mean - 0.3).abs() < 0.35,
        "beta_a mean {}",
        summary.beta_a.mean
    );
    assert!(summary.sigma_e_mean > 0.3 && summary.sigma_e_mean < 3.0);
    assert!(summary.sigma_g_mean > 0.5 && summary.sigma_g_mean < 2.0);
}

#[test]
fn permuted_exposure_removes_mediation_signal() {
    let mut rng = StdRng::seed_from_u64(2024);
    let sim = simulate_mediation_data(&truth(), 100, &mut rng).expect("valid truth");
    let unpermuted = summarize(&sim.y, &sim.a, &sim.m, 17);

    let mut perm_rng = StdRng::seed_from_u64(derive_chain_seed(17, 1));
    let permuted_a = permute_exposure(sim.a.view(), &mut perm_rng);
    let permuted = summarize(&sim.y, &permuted_a, &sim.m, 18);

    assert!(
        permuted.mediators[0].alpha_a_inclusion < unpermuted.mediators[0].alpha_a_inclusion,
        "permuted {} vs unpermuted {}",
        permuted.mediators[0].alpha_a_inclusion,
        unpermuted.mediators[0].alpha_a_inclusion
    );
    assert!(permuted.mediators[0].mediation_effect.abs() < unpermuted.mediators[0].mediation_effect);
}
