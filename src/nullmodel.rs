//! Null models: randomized communities and randomized taxon distances.
//!
//! Every variant produces the inputs of exactly one replicate. Inputs a model
//! leaves alone are borrowed, not cloned (see [`Randomized`]).
//!
//! | model             | abundance matrix              | distance matrix     |
//! |-------------------|-------------------------------|---------------------|
//! | `taxa.labels`     | unchanged                     | labels permuted     |
//! | `richness`        | shuffled within each sample   | unchanged           |
//! | `frequency`       | shuffled within each taxon    | unchanged           |
//! | `sample.pool`     | see [`SamplePoolMode`]        | unchanged           |
//! | `phylogeny.pool`  | shuffled within each sample   | labels permuted     |
//! | `independentswap` | Gotelli (2000) swaps          | unchanged           |
//! | `trialswap`       | Miklós & Podani (2004) trials | unchanged           |
//!
//! The swap algorithms move abundances between two cells of the same sample,
//! so sample richness, sample abundance multisets and taxon occurrence
//! frequencies are all preserved exactly.

use crate::error::{Result, SesError};
use crate::matrix::{AbundanceMatrix, LabeledMatrix};
use log::warn;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Attempts allowed to find one checkerboard in `independentswap` before giving up.
pub const MAX_SWAP_ATTEMPTS: usize = 100_000;

/// Randomization strategy for one replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullModel {
    #[serde(rename = "taxa.labels")]
    TaxaLabels,
    #[serde(rename = "richness")]
    Richness,
    #[serde(rename = "frequency")]
    Frequency,
    #[serde(rename = "sample.pool")]
    SamplePool,
    #[serde(rename = "phylogeny.pool")]
    PhylogenyPool,
    #[serde(rename = "independentswap")]
    IndependentSwap,
    #[serde(rename = "trialswap")]
    TrialSwap,
}

/// How `sample.pool` draws communities.
///
/// `Richness` reproduces the long-standing behaviour where `sample.pool` is the
/// same within-sample shuffle as `richness`. `Pool` draws each sample's taxa
/// from the pool of taxa occurring in at least one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplePoolMode {
    #[default]
    Richness,
    Pool,
}

/// Knobs shared by all null models.
#[derive(Debug, Clone, Copy)]
pub struct NullOptions {
    /// Successful swaps (`independentswap`) or trials (`trialswap`).
    pub iterations: usize,
    pub sample_pool: SamplePoolMode,
}

/// Inputs of one replicate.
#[derive(Debug)]
pub struct Randomized<'a> {
    pub comm: Cow<'a, AbundanceMatrix>,
    pub dist: Cow<'a, LabeledMatrix>,
}

impl NullModel {
    pub const ALL: [NullModel; 7] = [
        NullModel::TaxaLabels,
        NullModel::Richness,
        NullModel::Frequency,
        NullModel::SamplePool,
        NullModel::PhylogenyPool,
        NullModel::IndependentSwap,
        NullModel::TrialSwap,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NullModel::TaxaLabels => "taxa.labels",
            NullModel::Richness => "richness",
            NullModel::Frequency => "frequency",
            NullModel::SamplePool => "sample.pool",
            NullModel::PhylogenyPool => "phylogeny.pool",
            NullModel::IndependentSwap => "independentswap",
            NullModel::TrialSwap => "trialswap",
        }
    }

    /// Whether `iterations` affects this model.
    pub fn uses_iterations(self) -> bool {
        matches!(self, NullModel::IndependentSwap | NullModel::TrialSwap)
    }

    /// Produce the randomized inputs of one replicate.
    pub fn randomize<'a, R: Rng + ?Sized>(
        self,
        comm: &'a AbundanceMatrix,
        dist: &'a LabeledMatrix,
        opts: &NullOptions,
        rng: &mut R,
    ) -> Randomized<'a> {
        let (new_comm, new_dist) = match self {
            NullModel::TaxaLabels => (None, Some(shuffle_taxa_labels(dist, rng))),
            NullModel::Richness => (Some(shuffle_within_samples(comm, rng)), None),
            NullModel::Frequency => (Some(shuffle_within_taxa(comm, rng)), None),
            NullModel::SamplePool => match opts.sample_pool {
                SamplePoolMode::Richness => (Some(shuffle_within_samples(comm, rng)), None),
                SamplePoolMode::Pool => (Some(draw_from_pool(comm, rng)), None),
            },
            NullModel::PhylogenyPool => {
                let c = shuffle_within_samples(comm, rng);
                (Some(c), Some(shuffle_taxa_labels(dist, rng)))
            }
            NullModel::IndependentSwap => (Some(independent_swap(comm, opts.iterations, rng)), None),
            NullModel::TrialSwap => (Some(trial_swap(comm, opts.iterations, rng)), None),
        };
        Randomized {
            comm: new_comm.map_or(Cow::Borrowed(comm), Cow::Owned),
            dist: new_dist.map_or(Cow::Borrowed(dist), Cow::Owned),
        }
    }
}

impl fmt::Display for NullModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NullModel {
    type Err = SesError;

    fn from_str(s: &str) -> Result<Self> {
        NullModel::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| SesError::UnknownNullModel(s.to_string()))
    }
}

/// Permute the taxon labels of the distance matrix uniformly at random.
pub fn shuffle_taxa_labels<R: Rng + ?Sized>(dist: &LabeledMatrix, rng: &mut R) -> LabeledMatrix {
    let mut perm: Vec<usize> = (0..dist.len()).collect();
    perm.shuffle(rng);
    dist.permuted(&perm)
}

/// Shuffle each sample's row. Richness and the row's abundance multiset are kept.
pub fn shuffle_within_samples<R: Rng + ?Sized>(comm: &AbundanceMatrix, rng: &mut R) -> AbundanceMatrix {
    let values = comm
        .values
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row.shuffle(rng);
            row
        })
        .collect();
    comm.with_values(values)
}

/// Shuffle each taxon's column. Occurrence frequency is kept.
pub fn shuffle_within_taxa<R: Rng + ?Sized>(comm: &AbundanceMatrix, rng: &mut R) -> AbundanceMatrix {
    let mut values = comm.values.clone();
    let mut column = Vec::with_capacity(comm.n_samples());
    for t in 0..comm.n_taxa() {
        column.clear();
        column.extend(values.iter().map(|row| row[t]));
        column.shuffle(rng);
        for (row, &v) in values.iter_mut().zip(&column) {
            row[t] = v;
        }
    }
    comm.with_values(values)
}

/// Redraw every sample from the pool of taxa present in at least one sample.
///
/// Each sample keeps its richness and its non-zero abundances, which are
/// assigned in random order to `richness` distinct pool taxa drawn with equal
/// probability.
pub fn draw_from_pool<R: Rng + ?Sized>(comm: &AbundanceMatrix, rng: &mut R) -> AbundanceMatrix {
    let pool: Vec<usize> = comm
        .frequency()
        .iter()
        .enumerate()
        .filter(|&(_, &f)| f > 0)
        .map(|(t, _)| t)
        .collect();

    let values = comm
        .values
        .iter()
        .map(|row| {
            let mut present: Vec<f64> = row.iter().copied().filter(|&v| v > 0.0).collect();
            present.shuffle(rng);
            let mut new_row = vec![0.0; row.len()];
            let picks = rand::seq::index::sample(rng, pool.len(), present.len());
            for (k, v) in picks.into_iter().zip(present) {
                new_row[pool[k]] = v;
            }
            new_row
        })
        .collect();
    comm.with_values(values)
}

/// Independent swap (Gotelli 2000): perform `iterations` checkerboard swaps.
///
/// Stops early, with a warning, when the matrix admits no checkerboard at all
/// or one cannot be found within [`MAX_SWAP_ATTEMPTS`] draws.
pub fn independent_swap<R: Rng + ?Sized>(comm: &AbundanceMatrix, iterations: usize, rng: &mut R) -> AbundanceMatrix {
    let mut values = comm.values.clone();
    if !has_checkerboard(&values) {
        warn!("independentswap: matrix has no checkerboard, returning it unchanged");
        return comm.with_values(values);
    }
    for done in 0..iterations {
        let mut swapped = false;
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let (i, j, a, b) = pick_quad(values.len(), comm.n_taxa(), rng);
            if try_swap(&mut values, i, j, a, b) {
                swapped = true;
                break;
            }
        }
        if !swapped {
            warn!("independentswap: no checkerboard found after {MAX_SWAP_ATTEMPTS} attempts, stopping at {done} swaps");
            break;
        }
    }
    comm.with_values(values)
}

/// Trial swap (Miklós & Podani 2004): `iterations` random 2×2 trials, each
/// swapped only when it is a checkerboard.
pub fn trial_swap<R: Rng + ?Sized>(comm: &AbundanceMatrix, iterations: usize, rng: &mut R) -> AbundanceMatrix {
    let mut values = comm.values.clone();
    if values.len() < 2 || comm.n_taxa() < 2 {
        return comm.with_values(values);
    }
    for _ in 0..iterations {
        let (i, j, a, b) = pick_quad(values.len(), comm.n_taxa(), rng);
        try_swap(&mut values, i, j, a, b);
    }
    comm.with_values(values)
}

/// Two distinct rows and two distinct columns.
fn pick_quad<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> (usize, usize, usize, usize) {
    let i = rng.gen_range(0..rows);
    let mut j = rng.gen_range(0..rows - 1);
    if j >= i {
        j += 1;
    }
    let a = rng.gen_range(0..cols);
    let mut b = rng.gen_range(0..cols - 1);
    if b >= a {
        b += 1;
    }
    (i, j, a, b)
}

/// Swap the 2×2 submatrix `(i, j) × (a, b)` if it is a checkerboard.
///
/// ```text
///      a  b          a  b
/// i  [ x  0 ]   →  [ 0  x ]
/// j  [ 0  y ]      [ y  0 ]
/// ```
fn try_swap(values: &mut [Vec<f64>], i: usize, j: usize, a: usize, b: usize) -> bool {
    let p = |v: f64| v > 0.0;
    let diagonal = p(values[i][a]) && p(values[j][b]) && !p(values[i][b]) && !p(values[j][a]);
    let anti = p(values[i][b]) && p(values[j][a]) && !p(values[i][a]) && !p(values[j][b]);
    if diagonal || anti {
        values[i].swap(a, b);
        values[j].swap(a, b);
        true
    } else {
        false
    }
}

/// True if two samples each hold a taxon the other lacks.
fn has_checkerboard(values: &[Vec<f64>]) -> bool {
    for (i, ri) in values.iter().enumerate() {
        for rj in &values[i + 1..] {
            let i_only = ri.iter().zip(rj).any(|(&x, &y)| x > 0.0 && y <= 0.0);
            let j_only = ri.iter().zip(rj).any(|(&x, &y)| x <= 0.0 && y > 0.0);
            if i_only && j_only {
                return true;
            }
        }
    }
    false
}
