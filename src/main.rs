use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use phylo_beta_ses::bootstrap::{BootstrapConfig, bootstrap};
use phylo_beta_ses::distances::Metric;
use phylo_beta_ses::error::SesError;
use phylo_beta_ses::groups::GroupLabels;
use phylo_beta_ses::io::{
    read_abundance_tsv, read_groups_tsv, read_square_tsv, read_tree_distances, write_ses_result,
    write_table,
};
use phylo_beta_ses::matrix::LabeledMatrix;
use phylo_beta_ses::nullmodel::{NullModel, SamplePoolMode};
use phylo_beta_ses::permtest::{PermTestConfig, permtest};
use phylo_beta_ses::ses::{SesConfig, ses_beta};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

/// Standardized effect sizes of phylogenetic beta diversity (MPD / MNTD)
/// against null-model randomizations, plus group-level significance tests
/// on the resulting z-matrices.
#[derive(Parser, Debug)]
#[command(name = "phylo-beta-ses", version, about = "SES of phylogenetic beta diversity")]
struct Args {
    /// Quiet mode: only warnings and errors are logged
    #[arg(short = 'q', long = "quiet", global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute observed, null mean/sd, rank, z and p matrices
    Ses(SesArgs),
    /// Permutation test of within/between group mean z
    Permtest(PermArgs),
    /// Bootstrap quantiles and FDR-adjusted p-values of group mean z
    Bootstrap(BootArgs),
}

#[derive(clap::Args, Debug)]
struct SesArgs {
    /// Samples × taxa abundance table (TSV, .gz allowed)
    #[arg(short = 'a', long = "abundance")]
    abundance: PathBuf,

    /// Taxa × taxa distance matrix (TSV, .gz allowed)
    #[arg(short = 'd', long = "distance", conflicts_with = "tree", required_unless_present = "tree")]
    distance: Option<PathBuf>,

    /// Newick or NEXUS tree; cophenetic distances are used
    #[arg(short = 't', long = "tree")]
    tree: Option<PathBuf>,

    /// Output prefix; one TSV per result matrix is written
    #[arg(short = 'o', long = "output")]
    output: String,

    /// Between-community metric
    #[arg(long = "metric", value_enum, default_value_t = MetricArg::Mpd)]
    metric: MetricArg,

    /// taxa.labels | richness | frequency | sample.pool | phylogeny.pool | independentswap | trialswap
    #[arg(long = "null-model", default_value = "taxa.labels")]
    null_model: String,

    /// Weight distances by abundance
    #[arg(long = "weighted", default_value_t = false)]
    weighted: bool,

    /// Number of null replicates
    #[arg(long = "runs", default_value_t = 999)]
    runs: usize,

    /// Swaps / trials per replicate (independentswap, trialswap)
    #[arg(long = "iterations", default_value_t = 1000)]
    iterations: usize,

    /// Worker threads (0 = all cores)
    #[arg(long = "cores", default_value_t = 0)]
    cores: usize,

    /// Random seed
    #[arg(long = "seed", default_value_t = 42)]
    seed: u64,

    /// sample.pool semantics: richness (same as the richness model) or pool
    #[arg(long = "sample-pool", value_enum, default_value_t = PoolArg::Richness)]
    sample_pool: PoolArg,

    /// Gzip the output matrices
    #[arg(long = "gzip", default_value_t = false)]
    gzip: bool,
}

#[derive(clap::Args, Debug)]
struct PermArgs {
    /// z-matrix (TSV, e.g. the obs.z output of `ses`)
    #[arg(short = 'z', long = "zmatrix")]
    zmatrix: PathBuf,

    /// sample<TAB>group file
    #[arg(short = 'g', long = "groups")]
    groups: PathBuf,

    /// Output table (.tsv, .tsv.gz or .json)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    #[arg(long = "permutations", default_value_t = 999)]
    permutations: usize,

    #[arg(long = "seed", default_value_t = 42)]
    seed: u64,
}

#[derive(clap::Args, Debug)]
struct BootArgs {
    /// z-matrix (TSV, e.g. the obs.z output of `ses`)
    #[arg(short = 'z', long = "zmatrix")]
    zmatrix: PathBuf,

    /// sample<TAB>group file
    #[arg(short = 'g', long = "groups")]
    groups: PathBuf,

    /// Output table (.tsv, .tsv.gz or .json)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Bootstrap resamples per comparison
    #[arg(short = 'R', long = "resamples", default_value_t = 1000)]
    resamples: usize,

    /// Quantiles to report
    #[arg(long = "probs", value_delimiter = ',', default_values_t = vec![0.025, 0.5, 0.975])]
    probs: Vec<f64>,

    #[arg(long = "seed", default_value_t = 42)]
    seed: u64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MetricArg { Mpd, Mntd }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PoolArg { Richness, Pool }

/// Failure classes, mapped onto exit codes.
enum Failure {
    Input(SesError),
    Compute(SesError),
    Write(SesError),
}

impl Failure {
    fn code(&self) -> u8 {
        match self {
            Failure::Input(_) => 2,
            Failure::Compute(_) => 3,
            Failure::Write(_) => 4,
        }
    }

    fn error(&self) -> &SesError {
        match self {
            Failure::Input(e) | Failure::Compute(e) | Failure::Write(e) => e,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let outcome = match args.command {
        Command::Ses(a) => run_ses(a),
        Command::Permtest(a) => run_permtest(a),
        Command::Bootstrap(a) => run_bootstrap(a),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(f) => {
            error!("{}", f.error());
            ExitCode::from(f.code())
        }
    }
}

fn run_ses(args: SesArgs) -> Result<(), Failure> {
    // validate everything before reading matrices or randomizing
    let null_model: NullModel = args.null_model.parse().map_err(Failure::Input)?;
    let config = SesConfig {
        null_model,
        abundance_weighted: args.weighted,
        runs: args.runs,
        iterations: args.iterations,
        cores: args.cores,
        seed: args.seed,
        sample_pool: match args.sample_pool {
            PoolArg::Richness => SamplePoolMode::Richness,
            PoolArg::Pool => SamplePoolMode::Pool,
        },
    };
    config.validate().map_err(Failure::Input)?;
    let metric = match args.metric {
        MetricArg::Mpd => Metric::Mpd,
        MetricArg::Mntd => Metric::Mntd,
    };

    let t0 = Instant::now();
    let comm = read_abundance_tsv(&args.abundance).map_err(Failure::Input)?;
    let dist = match (&args.distance, &args.tree) {
        (Some(d), _) => read_square_tsv(d),
        (None, Some(t)) => read_tree_distances(t),
        (None, None) => Err(SesError::InvalidParameter("either --distance or --tree is required".to_string())),
    }
    .map_err(Failure::Input)?;
    info!(
        "Read {} samples x {} taxa and a {}-taxon distance matrix in {:.3}s",
        comm.n_samples(),
        comm.n_taxa(),
        dist.len(),
        t0.elapsed().as_secs_f64()
    );

    let t1 = Instant::now();
    let res = ses_beta(metric.kernel(), &comm, &dist, &config).map_err(|e| match e {
        SesError::MissingTaxa(_) | SesError::InvalidMatrix(_) | SesError::InvalidParameter(_) => Failure::Input(e),
        other => Failure::Compute(other),
    })?;
    info!("SES computed in {:.3}s", t1.elapsed().as_secs_f64());

    let t2 = Instant::now();
    let written = write_ses_result(&args.output, &res, args.gzip).map_err(Failure::Write)?;
    info!("Wrote {} files in {:.3}s", written.len(), t2.elapsed().as_secs_f64());
    Ok(())
}

fn load_z_and_groups(zmatrix: &Path, groups: &Path) -> Result<(LabeledMatrix, GroupLabels), Failure> {
    let z = read_square_tsv(zmatrix).map_err(Failure::Input)?;
    let map = read_groups_tsv(groups).map_err(Failure::Input)?;
    let labels = GroupLabels::from_map(&z.labels, &map).map_err(Failure::Input)?;
    info!("Read {}-sample z-matrix with {} groups", z.len(), labels.n_groups());
    Ok((z, labels))
}

fn run_permtest(args: PermArgs) -> Result<(), Failure> {
    let (z, groups) = load_z_and_groups(&args.zmatrix, &args.groups)?;
    let config = PermTestConfig { permutations: args.permutations, seed: args.seed };

    let t0 = Instant::now();
    let rows = permtest(&z, &groups, &config).map_err(Failure::Compute)?;
    info!("{} permutations in {:.3}s", config.permutations, t0.elapsed().as_secs_f64());

    write_table(&args.output, &rows).map_err(Failure::Write)
}

fn run_bootstrap(args: BootArgs) -> Result<(), Failure> {
    let (z, groups) = load_z_and_groups(&args.zmatrix, &args.groups)?;
    let config = BootstrapConfig { resamples: args.resamples, probs: args.probs, seed: args.seed };
    config.validate().map_err(Failure::Input)?;

    let t0 = Instant::now();
    let rows = bootstrap(&z, &groups, &config).map_err(Failure::Compute)?;
    info!("{} bootstrap resamples in {:.3}s", config.resamples, t0.elapsed().as_secs_f64());

    write_table(&args.output, &rows).map_err(Failure::Write)
}
