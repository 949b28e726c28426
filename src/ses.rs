//! Standardized effect sizes of between-community distances.
//!
//! # Algorithm
//! 1. Observed matrix: run the kernel on the unmodified inputs.
//! 2. For `r in 0..runs`: randomize the inputs with the chosen null model,
//!    using a `ChaCha8Rng` seeded with `seed + r`, and run the kernel again.
//!    Replicates only share the read-only inputs and run on the rayon pool.
//! 3. Once every replicate is back, one pass over the cells computes
//!    ```text
//!    mean, sd   over the defined replicate values
//!    z          (obs - mean) / sd            NA if sd is 0 or NA
//!    rank       average rank of obs in {obs, rep_1..rep_runs}
//!    p          rank / (runs + 1)
//!    ```
//!    Rank and p are NA on the diagonal.
//!
//! Seeding per replicate index (instead of sharing one generator) makes the
//! result independent of the number of worker threads.

use crate::distances::{BetaDistance, TaxonIndex, compute_pairwise_parallel};
use crate::error::{Result, SesError};
use crate::matrix::{AbundanceMatrix, LabeledMatrix};
use crate::nullmodel::{NullModel, NullOptions, SamplePoolMode};
use crate::stats;
use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Configuration of one SES computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SesConfig {
    pub null_model: NullModel,
    pub abundance_weighted: bool,
    /// Number of null replicates.
    pub runs: usize,
    /// Swaps / trials per replicate for the swap models.
    pub iterations: usize,
    /// Worker threads; 0 uses the global rayon pool.
    pub cores: usize,
    pub seed: u64,
    pub sample_pool: SamplePoolMode,
}

impl Default for SesConfig {
    fn default() -> Self {
        Self {
            null_model: NullModel::TaxaLabels,
            abundance_weighted: false,
            runs: 999,
            iterations: 1000,
            cores: 0,
            seed: 42,
            sample_pool: SamplePoolMode::Richness,
        }
    }
}

impl SesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runs == 0 {
            return Err(SesError::InvalidParameter("runs must be a positive integer".to_string()));
        }
        if self.iterations == 0 {
            return Err(SesError::InvalidParameter(
                "iterations must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    fn null_options(&self) -> NullOptions {
        NullOptions { iterations: self.iterations, sample_pool: self.sample_pool }
    }
}

/// Aggregated SES statistics, every matrix keyed by sample id.
#[derive(Debug, Clone)]
pub struct SesResult {
    pub samples: Vec<String>,
    /// Non-zero taxa per sample.
    pub richness: Vec<usize>,
    pub obs: LabeledMatrix,
    pub mean: LabeledMatrix,
    pub sd: LabeledMatrix,
    pub rank: LabeledMatrix,
    pub z: LabeledMatrix,
    pub p: LabeledMatrix,
    pub runs: usize,
}

impl SesResult {
    /// Named matrices in output order.
    pub fn matrices(&self) -> [(&'static str, &LabeledMatrix); 6] {
        [
            ("obs", &self.obs),
            ("rand.mean", &self.mean),
            ("rand.sd", &self.sd),
            ("obs.rank", &self.rank),
            ("obs.z", &self.z),
            ("obs.p", &self.p),
        ]
    }
}

/// Per-cell aggregate over the replicates.
#[derive(Debug, Clone, Copy)]
struct CellStats {
    mean: f64,
    sd: f64,
    rank: f64,
    z: f64,
    p: f64,
}

impl CellStats {
    fn from_replicates(obs: f64, reps: &[f64], runs: usize) -> Self {
        let mean = stats::mean(reps);
        let sd = stats::sd(reps);
        let z = if sd.is_nan() || sd == 0.0 { f64::NAN } else { (obs - mean) / sd };
        let rank = if mean.is_nan() { f64::NAN } else { stats::average_rank(obs, reps).0 };
        CellStats { mean, sd, rank, z, p: rank / (runs + 1) as f64 }
    }
}

/// Compute the SES of a between-community metric under a null model.
///
/// # Errors
/// Configuration problems (zero runs or iterations, an invalid distance
/// matrix, taxa missing from it) are reported before any randomization.
/// Once those checks pass replicates cannot fail; degenerate cells come
/// back as NA.
pub fn ses_beta(
    kernel: &dyn BetaDistance,
    comm: &AbundanceMatrix,
    dist: &LabeledMatrix,
    config: &SesConfig,
) -> Result<SesResult> {
    config.validate()?;
    dist.validate_distance()?;
    let index = TaxonIndex::resolve(comm, dist)?;

    info!(
        "SES of {} for {} samples x {} taxa: model {}, {} runs, weighted={}",
        kernel.name(),
        comm.n_samples(),
        comm.n_taxa(),
        config.null_model,
        config.runs,
        config.abundance_weighted
    );
    if config.null_model.uses_iterations() {
        debug!("{} swap iterations per replicate", config.iterations);
    }

    if config.cores > 0 {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(config.cores).build()?;
        Ok(pool.install(|| run(kernel, comm, dist, &index, config)))
    } else {
        Ok(run(kernel, comm, dist, &index, config))
    }
}

fn run(
    kernel: &dyn BetaDistance,
    comm: &AbundanceMatrix,
    dist: &LabeledMatrix,
    index: &TaxonIndex,
    config: &SesConfig,
) -> SesResult {
    let t0 = Instant::now();
    let obs = compute_pairwise_parallel(kernel, comm, dist, index, config.abundance_weighted);
    debug!("Observed matrix in {:.3}s", t0.elapsed().as_secs_f64());

    let t1 = Instant::now();
    let opts = config.null_options();
    let replicates: Vec<LabeledMatrix> = (0..config.runs)
        .into_par_iter()
        .map(|r| run_replicate(kernel, comm, dist, index, config, &opts, r))
        .collect();
    info!("{} null replicates in {:.3}s", replicates.len(), t1.elapsed().as_secs_f64());

    let t2 = Instant::now();
    let n = comm.n_samples();
    let cells: Vec<(usize, usize, CellStats)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| (i..n).map(move |j| (i, j)))
        .map(|(i, j)| {
            let reps: Vec<f64> = replicates.iter().map(|m| m.get(i, j)).collect();
            (i, j, CellStats::from_replicates(obs.get(i, j), &reps, config.runs))
        })
        .collect();

    let labels = comm.samples.clone();
    let mut mean = LabeledMatrix::filled(labels.clone(), f64::NAN);
    let mut sd = mean.clone();
    let mut rank = mean.clone();
    let mut z = mean.clone();
    let mut p = mean.clone();
    for (i, j, c) in cells {
        for (a, b) in [(i, j), (j, i)] {
            mean.values[a][b] = c.mean;
            sd.values[a][b] = c.sd;
            z.values[a][b] = c.z;
            if a != b {
                rank.values[a][b] = c.rank;
                p.values[a][b] = c.p;
            }
        }
    }
    debug!("Aggregated replicates in {:.3}s", t2.elapsed().as_secs_f64());

    SesResult {
        samples: labels,
        richness: comm.richness(),
        obs,
        mean,
        sd,
        rank,
        z,
        p,
        runs: config.runs,
    }
}

/// One null replicate. The randomized inputs are dropped on return.
fn run_replicate(
    kernel: &dyn BetaDistance,
    comm: &AbundanceMatrix,
    dist: &LabeledMatrix,
    index: &TaxonIndex,
    config: &SesConfig,
    opts: &NullOptions,
    r: usize,
) -> LabeledMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(r as u64));
    let randomized = config.null_model.randomize(comm, dist, opts, &mut rng);
    compute_pairwise_parallel(
        kernel,
        &randomized.comm,
        &randomized.dist,
        index,
        config.abundance_weighted,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distances::{Mntd, Mpd};
    use itertools::Itertools;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn comm() -> AbundanceMatrix {
        AbundanceMatrix::new(
            names(&["s1", "s2", "s3"]),
            names(&["a", "b", "c", "d"]),
            vec![
                vec![2.0, 1.0, 0.0, 0.0],
                vec![0.0, 0.0, 3.0, 1.0],
                vec![1.0, 0.0, 1.0, 1.0],
            ],
        )
        .unwrap()
    }

    fn dist() -> LabeledMatrix {
        LabeledMatrix::new(
            names(&["a", "b", "c", "d"]),
            vec![
                vec![0.0, 2.0, 6.0, 7.0],
                vec![2.0, 0.0, 5.0, 6.0],
                vec![6.0, 5.0, 0.0, 3.0],
                vec![7.0, 6.0, 3.0, 0.0],
            ],
        )
        .unwrap()
    }

    fn config(model: NullModel) -> SesConfig {
        SesConfig { null_model: model, runs: 99, seed: 2024, ..Default::default() }
    }

    #[test]
    fn taxa_labels_end_to_end() {
        let res = ses_beta(&Mpd, &comm(), &dist(), &config(NullModel::TaxaLabels)).unwrap();
        assert_eq!(res.runs, 99);
        assert_eq!(res.richness, vec![2, 2, 3]);
        // s1={a,b} vs s2={c,d}: (6 + 7 + 5 + 6) / 4
        assert!((res.obs.get(0, 1) - 6.0).abs() < 1e-12);

        for i in 0..3 {
            assert!(res.rank.get(i, i).is_nan());
            assert!(res.p.get(i, i).is_nan());
        }
        for indices in (0..3).permutations(2) {
            let (i, j) = (indices[0], indices[1]);
            let rank = res.rank.get(i, j);
            assert!((1.0..=100.0).contains(&rank), "rank {rank} out of range");
            assert_eq!(res.p.get(i, j), rank / 100.0);
            let z = (res.obs.get(i, j) - res.mean.get(i, j)) / res.sd.get(i, j);
            assert!((res.z.get(i, j) - z).abs() < 1e-12);
            assert_eq!(res.z.get(i, j), res.z.get(j, i));
        }

        let again = ses_beta(&Mpd, &comm(), &dist(), &config(NullModel::TaxaLabels)).unwrap();
        assert_eq!(again.rank, res.rank);
        assert_eq!(again.mean, res.mean);
    }

    #[test]
    fn thread_count_does_not_change_results() {
        for model in NullModel::ALL {
            let mut single = config(model);
            single.cores = 1;
            let mut many = config(model);
            many.cores = 4;
            let a = ses_beta(&Mntd, &comm(), &dist(), &single).unwrap();
            let b = ses_beta(&Mntd, &comm(), &dist(), &many).unwrap();
            assert_eq!(a.rank, b.rank, "model {model}");
            assert_eq!(a.sd, b.sd, "model {model}");
        }
    }

    #[test]
    fn zero_variance_gives_na_z() {
        // all distances equal: label permutations cannot change anything
        let flat = LabeledMatrix::new(
            names(&["a", "b", "c", "d"]),
            (0..4).map(|i| (0..4).map(|j| if i == j { 0.0 } else { 1.0 }).collect()).collect(),
        )
        .unwrap();
        let res = ses_beta(&Mpd, &comm(), &flat, &config(NullModel::TaxaLabels)).unwrap();
        assert_eq!(res.sd.get(0, 1), 0.0);
        assert!(res.z.get(0, 1).is_nan());
        // observed ties with all 99 replicates
        assert_eq!(res.rank.get(0, 1), 50.5);
    }

    #[test]
    fn empty_sample_propagates_na() {
        let c = AbundanceMatrix::new(
            names(&["s1", "s2", "s3"]),
            names(&["a", "b", "c", "d"]),
            vec![vec![1.0, 1.0, 0.0, 0.0], vec![0.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 1.0, 0.0]],
        )
        .unwrap();
        let res = ses_beta(&Mpd, &c, &dist(), &config(NullModel::TaxaLabels)).unwrap();
        assert!(res.mean.get(0, 1).is_nan());
        assert!(res.rank.get(0, 1).is_nan());
        assert!(res.z.get(1, 2).is_nan());
        assert!(!res.z.get(0, 2).is_nan());
    }

    #[test]
    fn configuration_errors_fail_fast() {
        let mut c = config(NullModel::Richness);
        c.runs = 0;
        assert!(matches!(ses_beta(&Mpd, &comm(), &dist(), &c), Err(SesError::InvalidParameter(_))));

        let mut c = config(NullModel::IndependentSwap);
        c.iterations = 0;
        assert!(matches!(ses_beta(&Mpd, &comm(), &dist(), &c), Err(SesError::InvalidParameter(_))));

        let small = LabeledMatrix::new(names(&["a", "b"]), vec![vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        let err = ses_beta(&Mpd, &comm(), &small, &config(NullModel::Richness));
        assert!(matches!(err, Err(SesError::MissingTaxa(ref t)) if t == &names(&["c", "d"])));

        // NA below the diagonal would otherwise leak into whole cells
        let mut holed = dist();
        holed.values[1][0] = f64::NAN;
        holed.values[3][3] = f64::NAN;
        let mut c = config(NullModel::TaxaLabels);
        c.runs = 9;
        assert!(matches!(ses_beta(&Mpd, &comm(), &holed, &c), Err(SesError::InvalidMatrix(_))));
    }

    #[test]
    fn default_config() {
        let c = SesConfig::default();
        assert_eq!((c.runs, c.iterations), (999, 1000));
        assert!(c.validate().is_ok());
    }
}
