use clap::{Args, Parser, Subcommand};
use csv::{ReaderBuilder, WriterBuilder};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use sparse_mediation::{
    Hyperpriors, InitialCoefficients, MediationData, MediationTruth, MemorySink,
    PenaltyThresholds, PosteriorSummary, RunIdentifiers, SampleArchive, SamplerConfig,
    derive_chain_seed, permute_exposure, run_chain, simulate_mediation_data, standardize_columns,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "sparse-mediation")]
#[command(about = "Thresholded spike-and-slab Gibbs sampler for mediation analysis", long_about = None)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (build ", env!("SPARSE_MEDIATION_BUILD_TIMESTAMP"), ")"))]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(alias = "sample")]
    Run(RunArgs),
    #[command(alias = "generate")]
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    data: PathBuf,
    #[arg(long = "outcome", default_value = "Y")]
    outcome: String,
    #[arg(long = "exposure", default_value = "A")]
    exposure: String,
    /// Comma-separated mediator columns; defaults to every other column.
    #[arg(long = "mediators")]
    mediators: Option<String>,
    /// Product threshold on |beta_m * alpha_a|.
    #[arg(long = "lambda0")]
    lambda0: f64,
    /// Marginal threshold on |beta_m|.
    #[arg(long = "lambda1")]
    lambda1: f64,
    /// Marginal threshold on |alpha_a|.
    #[arg(long = "lambda2")]
    lambda2: f64,
    #[arg(long = "burn-in", default_value_t = 5_000)]
    burn_in: usize,
    /// Iterations after burn-in.
    #[arg(long = "iterations", default_value_t = 20_000)]
    iterations: usize,
    #[arg(long = "thin", default_value_t = 10)]
    thin: usize,
    /// Rows buffered before each write to the results table.
    #[arg(long = "capacity", default_value_t = 499)]
    capacity: usize,
    #[arg(long = "seed", default_value_t = 42)]
    seed: u64,
    #[arg(long = "q1", default_value_t = 0)]
    q1: usize,
    #[arg(long = "q2", default_value_t = 0)]
    q2: usize,
    /// Extra runs with a permuted exposure (permute indices 1..=N).
    #[arg(long = "permutations", default_value_t = 0)]
    permutations: usize,
    #[arg(long = "out-dir", default_value = ".")]
    out_dir: PathBuf,
    /// Center and scale Y, A and every mediator before sampling.
    #[arg(long = "standardize", default_value_t = false)]
    standardize: bool,
    #[arg(long = "beta-m-prior-rate", default_value_t = 0.09)]
    beta_m_prior_rate: f64,
    #[arg(long = "alpha-a-prior-rate", default_value_t = 0.09)]
    alpha_a_prior_rate: f64,
    /// Credible level for the summary intervals.
    #[arg(long = "level", default_value_t = 0.95)]
    level: f64,
    #[arg(long = "no-header", default_value_t = false)]
    no_header: bool,
    #[arg(long = "delimiter", default_value = "\t")]
    delimiter: String,
    #[arg(long = "progress-every", default_value_t = 50_000)]
    progress_every: usize,
    #[arg(long = "shrinkage-log-every", default_value_t = 10_000)]
    shrinkage_log_every: usize,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long = "n", default_value_t = 100)]
    n: usize,
    /// Comma-separated true mediator -> outcome effects.
    #[arg(long = "beta-m")]
    beta_m: String,
    /// Comma-separated true exposure -> mediator effects.
    #[arg(long = "alpha-a")]
    alpha_a: String,
    #[arg(long = "beta-a", default_value_t = 0.0)]
    beta_a: f64,
    #[arg(long = "sigma-m", default_value_t = 1.0)]
    sigma_m: f64,
    #[arg(long = "sigma-y", default_value_t = 1.0)]
    sigma_y: f64,
    #[arg(long = "seed", default_value_t = 42)]
    seed: u64,
    #[arg(long = "out")]
    out: PathBuf,
}

struct Dataset {
    headers: Vec<String>,
    values: Array2<f64>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_sampler(args),
        Command::Simulate(args) => run_simulate(args),
    }
}

fn run_sampler(args: RunArgs) -> Result<(), String> {
    let ds = load_dataset(&args.data)?;
    let col_map: HashMap<String, usize> = ds
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.clone(), i))
        .collect();
    let column = |name: &str| -> Result<usize, String> {
        col_map
            .get(name)
            .copied()
            .ok_or_else(|| format!("column '{name}' not found"))
    };
    let y_col = column(&args.outcome)?;
    let a_col = column(&args.exposure)?;
    let mediator_cols = match &args.mediators {
        Some(list) => list
            .split(',')
            .map(|s| column(s.trim()))
            .collect::<Result<Vec<_>, _>>()?,
        None => (0..ds.headers.len())
            .filter(|&c| c != y_col && c != a_col)
            .collect(),
    };
    if mediator_cols.is_empty() {
        return Err("no mediator columns selected".to_string());
    }

    let n = ds.values.nrows();
    let mut y = ds.values.column(y_col).to_owned();
    let mut a = ds.values.column(a_col).to_owned();
    let mut m = Array2::<f64>::zeros((n, mediator_cols.len()));
    for (j, &c) in mediator_cols.iter().enumerate() {
        m.column_mut(j).assign(&ds.values.column(c));
    }
    if args.standardize {
        let mut ya = Array2::<f64>::zeros((n, 2));
        ya.column_mut(0).assign(&y);
        ya.column_mut(1).assign(&a);
        standardize_columns(&mut ya).map_err(|e| format!("failed to standardize Y/A: {e}"))?;
        y = ya.column(0).to_owned();
        a = ya.column(1).to_owned();
        standardize_columns(&mut m).map_err(|e| format!("failed to standardize mediators: {e}"))?;
    }

    let penalty = PenaltyThresholds::new(args.lambda0, args.lambda1, args.lambda2)
        .map_err(|e| e.to_string())?;
    let priors = Hyperpriors::with_scale_overrides(&[args.beta_m_prior_rate, args.alpha_a_prior_rate])
        .map_err(|e| e.to_string())?;
    let delimiter = parse_delimiter(&args.delimiter)?;
    let config = SamplerConfig {
        burn_in: args.burn_in,
        n_iter: args.iterations,
        thinning: args.thin,
        archive_capacity: args.capacity,
        progress_log_every: args.progress_every,
        shrinkage_log_every: args.shrinkage_log_every,
        seed: args.seed,
    };
    config.validate().map_err(|e| e.to_string())?;
    if !(args.level > 0.0 && args.level < 1.0) {
        return Err(format!("--level must be in (0, 1), got {}", args.level));
    }
    fs::create_dir_all(&args.out_dir)
        .map_err(|e| format!("failed to create '{}': {e}", args.out_dir.display()))?;

    let q = mediator_cols.len();
    let mediator_names: Vec<String> = mediator_cols.iter().map(|&c| ds.headers[c].clone()).collect();

    let reports = (0..=args.permutations)
        .into_par_iter()
        .map(|permute| -> Result<(usize, PosteriorSummary), String> {
            let ids = RunIdentifiers {
                q1: args.q1,
                q2: args.q2,
                permute,
            };
            let chain_seed = derive_chain_seed(args.seed, permute as u64);
            let exposure = if permute == 0 {
                a.clone()
            } else {
                let mut perm_rng = StdRng::seed_from_u64(chain_seed ^ 0xA5A5_A5A5_A5A5_A5A5);
                permute_exposure(a.view(), &mut perm_rng)
            };
            let data = MediationData::new(y.view(), exposure.view(), m.view())
                .map_err(|e| format!("run {permute}: {e}"))?;
            let init = InitialCoefficients::marginal(&data);
            let archive = SampleArchive::create(
                &args.out_dir,
                ids,
                q,
                config.archive_capacity,
                delimiter,
                !args.no_header,
            )
            .map_err(|e| format!("run {permute}: {e}"))?;
            let chain_config = SamplerConfig {
                seed: chain_seed,
                ..config.clone()
            };
            let mut sink = (archive, MemorySink::default());
            let outcome = run_chain(data, init, priors, penalty, chain_config, &mut sink, None)
                .map_err(|e| format!("run {permute}: {e}"))?;
            let (archive, memory) = sink;
            let summary = PosteriorSummary::from_rows(memory.rows(), args.level)
                .map_err(|e| format!("run {permute}: {e}"))?;
            write_summary_json(&args.out_dir.join(ids.summary_file_name()), &summary)?;
            println!(
                "run {permute}: {} iterations, {} rows -> {}",
                outcome.iterations_completed,
                archive.rows_written(),
                archive.path().display()
            );
            Ok((permute, summary))
        })
        .collect::<Result<Vec<_>, String>>()?;

    for (permute, summary) in &reports {
        print_summary(*permute, summary, &mediator_names);
    }
    Ok(())
}

fn print_summary(permute: usize, summary: &PosteriorSummary, names: &[String]) {
    println!();
    println!(
        "permute {permute}: {} draws, beta_a {:.4} [{:.4}, {:.4}], sigma_e {:.4}, sigma_g {:.4}",
        summary.n_draws,
        summary.beta_a.mean,
        summary.beta_a.lower,
        summary.beta_a.upper,
        summary.sigma_e_mean,
        summary.sigma_g_mean
    );
    println!(
        "{:<16} {:>10} {:>22} {:>10} {:>22} {:>8} {:>8} {:>8} {:>10}",
        "mediator", "beta_m", "beta_m CI", "alpha_a", "alpha_a CI", "P(b)", "P(a)", "P(ab)", "effect"
    );
    for med in &summary.mediators {
        let name = names.get(med.index).map(String::as_str).unwrap_or("?");
        println!(
            "{:<16} {:>10.4} {:>22} {:>10.4} {:>22} {:>8.3} {:>8.3} {:>8.3} {:>10.4}",
            name,
            med.beta_m.mean,
            format!("[{:.3}, {:.3}]", med.beta_m.lower, med.beta_m.upper),
            med.alpha_a.mean,
            format!("[{:.3}, {:.3}]", med.alpha_a.lower, med.alpha_a.upper),
            med.beta_m_inclusion,
            med.alpha_a_inclusion,
            med.joint_inclusion,
            med.mediation_effect
        );
    }
}

fn run_simulate(args: SimulateArgs) -> Result<(), String> {
    let truth = MediationTruth {
        beta_m: parse_f64_list(&args.beta_m, "--beta-m")?,
        alpha_a: parse_f64_list(&args.alpha_a, "--alpha-a")?,
        beta_a: args.beta_a,
        sigma_m: args.sigma_m,
        sigma_y: args.sigma_y,
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let sim = simulate_mediation_data(&truth, args.n, &mut rng).map_err(|e| e.to_string())?;
    let q = sim.m.ncols();

    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(&args.out)
        .map_err(|e| format!("failed to create output csv '{}': {e}", args.out.display()))?;
    let mut headers = vec!["Y".to_string(), "A".to_string()];
    headers.extend((1..=q).map(|j| format!("M{j}")));
    wtr.write_record(&headers)
        .map_err(|e| format!("failed to write csv header: {e}"))?;
    for i in 0..args.n {
        let mut row = vec![format!("{:.12}", sim.y[i]), format!("{:.12}", sim.a[i])];
        row.extend((0..q).map(|j| format!("{:.12}", sim.m[[i, j]])));
        wtr.write_record(row)
            .map_err(|e| format!("failed to write csv row {i}: {e}"))?;
    }
    wtr.flush()
        .map_err(|e| format!("failed to flush csv writer: {e}"))?;
    println!(
        "wrote {} rows with {} mediators to {}",
        args.n,
        q,
        args.out.display()
    );
    Ok(())
}

fn parse_f64_list(raw: &str, flag: &str) -> Result<Vec<f64>, String> {
    raw.split(',')
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid value '{}' in {flag}: {e}", s.trim()))
        })
        .collect()
}

fn parse_delimiter(raw: &str) -> Result<u8, String> {
    match raw {
        "\\t" | "tab" => Ok(b'\t'),
        "space" => Ok(b' '),
        s if s.len() == 1 => Ok(s.as_bytes()[0]),
        other => Err(format!("delimiter must be a single byte, got '{other}'")),
    }
}

fn write_summary_json(path: &Path, summary: &PosteriorSummary) -> Result<(), String> {
    let payload = serde_json::to_string_pretty(summary)
        .map_err(|e| format!("failed to serialize summary: {e}"))?;
    fs::write(path, payload)
        .map_err(|e| format!("failed to write summary '{}': {e}", path.display()))
}

fn load_dataset(path: &Path) -> Result<Dataset, String> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| format!("failed to open csv '{}': {e}", path.display()))?;

    let headers = rdr
        .headers()
        .map_err(|e| format!("failed to read csv headers: {e}"))?
        .iter()
        .map(|s| s.trim().to_string())
        .collect::<Vec<_>>();
    if headers.is_empty() {
        return Err("csv has no headers".to_string());
    }

    let p = headers.len();
    let mut flat = Vec::<f64>::new();
    let mut n = 0usize;
    for rec in rdr.records() {
        let record = rec.map_err(|e| format!("failed reading csv row: {e}"))?;
        if record.len() != p {
            return Err(format!(
                "csv row width mismatch: got {} fields, expected {}",
                record.len(),
                p
            ));
        }
        for (j, raw) in record.iter().enumerate() {
            let raw = raw.trim();
            let v = raw.parse::<f64>().map_err(|_| {
                format!(
                    "non-numeric value '{raw}' at row {}, column '{}'",
                    n + 1,
                    headers[j]
                )
            })?;
            flat.push(v);
        }
        n += 1;
    }
    if n == 0 {
        return Err("csv has no rows".to_string());
    }
    let values = Array2::from_shape_vec((n, p), flat)
        .map_err(|e| format!("failed to assemble data matrix: {e}"))?;
    Ok(Dataset { headers, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn delimiter_aliases() {
        assert_eq!(parse_delimiter("\t").expect("tab"), b'\t');
        assert_eq!(parse_delimiter("tab").expect("tab"), b'\t');
        assert_eq!(parse_delimiter(",").expect("comma"), b',');
        assert!(parse_delimiter("ab").is_err());
    }

    #[test]
    fn list_parsing_reports_bad_values() {
        assert_eq!(
            parse_f64_list("0.5, 0,-1e-2", "--beta-m").expect("valid"),
            vec![0.5, 0.0, -0.01]
        );
        assert!(parse_f64_list("0.5,x", "--beta-m").is_err());
    }

    #[test]
    fn dataset_loader_reads_numeric_csv() {
        let mut path = std::env::temp_dir();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        path.push(format!("sparse_mediation_load_{ts}.csv"));
        fs::write(&path, "Y,A,M1\n1.0,2.0,3.0\n-1,0.5,2\n").expect("write csv");
        let ds = load_dataset(&path).expect("load");
        assert_eq!(ds.headers, vec!["Y", "A", "M1"]);
        assert_eq!(ds.values.dim(), (2, 3));
        assert_eq!(ds.values[[1, 0]], -1.0);
        let _ = fs::remove_file(&path);
    }
}
