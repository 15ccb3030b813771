use csv::ReaderBuilder;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use sparse_mediation::{
    Hyperpriors, InitialCoefficients, MediationData, MediationTruth, MemorySink, PenaltyThresholds,
    RunIdentifiers, SampleArchive, SampleRow, SamplerConfig, run_chain, simulate_mediation_data,
};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(tag: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let mut dir = std::env::temp_dir();
    dir.push(format!("sparse_mediation_{tag}_{ts}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn simulated(n: usize, seed: u64) -> (Array1<f64>, Array1<f64>, Array2<f64>) {
    let truth = MediationTruth {
        beta_m: vec![0.5, 0.0],
        alpha_a: vec![0.6, 0.0],
        beta_a: 0.2,
        sigma_m: 1.0,
        sigma_y: 1.0,
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let sim = simulate_mediation_data(&truth, n, &mut rng).expect("valid truth");
    (sim.y, sim.a, sim.m)
}

fn read_table(path: &PathBuf, has_headers: bool) -> (Vec<String>, Vec<Vec<f64>>) {
    let mut rdr = ReaderBuilder::new()
        .has_headers(has_headers)
        .delimiter(b'\t')
        .from_path(path)
        .expect("open archive");
    let headers = if has_headers {
        rdr.headers()
            .expect("headers")
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        Vec::new()
    };
    let rows = rdr
        .records()
        .map(|rec| {
            rec.expect("record")
                .iter()
                .map(|v| v.parse::<f64>().expect("numeric cell"))
                .collect()
        })
        .collect();
    (headers, rows)
}

#[test]
fn archive_flushes_full_blocks_and_remainder() {
    let (y, a, m) = simulated(40, 1);
    let data = MediationData::new(y.view(), a.view(), m.view()).expect("valid data");
    let config = SamplerConfig {
        burn_in: 0,
        n_iter: 100,
        thinning: 10,
        archive_capacity: 4,
        seed: 5,
        ..SamplerConfig::default()
    };
    // Iterations 10, 20, ..., 90 are retained.
    assert_eq!(config.expected_rows(), 9);

    let dir = temp_dir("archive_blocks");
    let ids = RunIdentifiers {
        q1: 1,
        q2: 2,
        permute: 0,
    };
    let archive = SampleArchive::create(&dir, ids, 2, config.archive_capacity, b'\t', true)
        .expect("create archive");
    let mut sink = (archive, MemorySink::default());
    let outcome = run_chain(
        data,
        InitialCoefficients::marginal(&data),
        Hyperpriors::default(),
        PenaltyThresholds::new(0.1, 0.3, 0.3).expect("valid"),
        config,
        &mut sink,
        None,
    )
    .expect("chain");
    let (archive, memory) = sink;

    assert_eq!(outcome.rows_recorded, 9);
    assert_eq!(archive.rows_written(), 9);
    assert_eq!(archive.flushes(), 3);
    assert_eq!(archive.buffered(), 0);
    assert_eq!(
        archive.path().file_name().and_then(|s| s.to_str()),
        Some("results_12_0.txt")
    );

    let (headers, rows) = read_table(&archive.path().to_path_buf(), true);
    assert_eq!(headers, SampleRow::column_names(2));
    assert_eq!(rows.len(), 9);
    for (file_row, mem_row) in rows.iter().zip(memory.rows()) {
        assert_eq!(file_row.len(), SampleRow::width(2));
        let expected = mem_row.to_flat().expect("flat");
        for (got, want) in file_row.iter().zip(expected.iter()) {
            assert_eq!(got, want);
        }
        for j in 0..2 {
            for code in [file_row[4 * j + 2], file_row[4 * j + 3]] {
                assert!(code == 0.0 || code == 1.0 || code == 2.0, "label code {code}");
            }
        }
    }
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn headerless_archive_writes_only_data_rows() {
    let (y, a, m) = simulated(30, 2);
    let data = MediationData::new(y.view(), a.view(), m.view()).expect("valid data");
    let config = SamplerConfig {
        burn_in: 5,
        n_iter: 50,
        thinning: 5,
        seed: 9,
        ..SamplerConfig::default()
    };
    let dir = temp_dir("archive_headerless");
    let mut archive = SampleArchive::create_at(dir.join("draws.tsv"), 2, 499, b'\t', false)
        .expect("create archive");
    run_chain(
        data,
        InitialCoefficients::zeros(2),
        Hyperpriors::default(),
        PenaltyThresholds::new(0.1, 0.3, 0.3).expect("valid"),
        config.clone(),
        &mut archive,
        None,
    )
    .expect("chain");
    assert_eq!(archive.flushes(), 1);
    let (_, rows) = read_table(&archive.path().to_path_buf(), false);
    assert_eq!(rows.len(), config.expected_rows());
    assert!(rows.iter().all(|r| r.len() == 12));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn archive_rejects_rows_for_other_mediator_counts() {
    use sparse_mediation::{MixtureLabel, SampleSink};

    let dir = temp_dir("archive_width");
    let mut archive =
        SampleArchive::create_at(dir.join("draws.tsv"), 3, 2, b'\t', false).expect("archive");
    let row = SampleRow {
        beta_m: vec![0.1],
        alpha_a: vec![0.2],
        r1: vec![MixtureLabel::Positive],
        r3: vec![MixtureLabel::Positive],
        beta_a: 0.0,
        sigma_e: 1.0,
        sigma_g: 1.0,
        log_posterior: 0.0,
    };
    assert!(archive.record(&row).is_err());
    assert!(SampleArchive::create_at(dir.join("empty.tsv"), 3, 0, b'\t', false).is_err());
    let _ = fs::remove_dir_all(&dir);
}
