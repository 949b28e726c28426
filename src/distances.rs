//! Between-community phylogenetic distances.
//!
//! This module implements the pairwise distance kernel the SES engine runs once
//! for the observed data and once per null replicate:
//!
//! 1. **MPD** (between-community mean pairwise distance): mean distance between
//!    every taxon of community A and every taxon of community B. Abundance
//!    weighting uses the products of the two abundances as weights.
//!
//! 2. **MNTD** (between-community mean nearest taxon distance): for every taxon
//!    of A the distance to its closest taxon in B, and for every taxon of B the
//!    distance to its closest taxon in A; the result is the mean over all of
//!    these nearest distances. Weighted, each side contributes its
//!    relative-abundance-weighted mean and the two are averaged.
//!
//! Both metrics are exposed through the [`BetaDistance`] trait so the engine
//! does not care which one it is driving.

use crate::error::{Result, SesError};
use crate::matrix::{AbundanceMatrix, LabeledMatrix};
use rayon::prelude::*;

#[cfg(test)]
use itertools::Itertools;

/// A single community resolved against a distance matrix.
///
/// `taxa[k]` is a row index into the distance matrix and `abundances[k]` the
/// (strictly positive) abundance of that taxon in the sample.
#[derive(Debug, Clone, Default)]
pub struct Community {
    pub taxa: Vec<usize>,
    pub abundances: Vec<f64>,
}

impl Community {
    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }
}

/// A between-community distance measure.
pub trait BetaDistance: Sync + Send {
    /// Short name used in logs and output file names.
    fn name(&self) -> &'static str;

    /// Distance between two communities. `NaN` if either community is empty.
    fn between(&self, a: &Community, b: &Community, dist: &LabeledMatrix, weighted: bool) -> f64;
}

/// Between-community mean pairwise distance (`comdist`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Mpd;

/// Between-community mean nearest taxon distance (`comdistnt`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Mntd;

impl BetaDistance for Mpd {
    fn name(&self) -> &'static str {
        "mpd"
    }

    /// # Algorithm
    /// ```text
    /// unweighted: Σ_a Σ_b d(a,b) / (|A| |B|)
    /// weighted:   Σ_a Σ_b x_a y_b d(a,b) / Σ_a Σ_b x_a y_b
    /// ```
    fn between(&self, a: &Community, b: &Community, dist: &LabeledMatrix, weighted: bool) -> f64 {
        if a.is_empty() || b.is_empty() {
            return f64::NAN;
        }
        let mut total = 0.0;
        let mut weight = 0.0;
        for (&ta, &xa) in a.taxa.iter().zip(&a.abundances) {
            let row = &dist.values[ta];
            for (&tb, &yb) in b.taxa.iter().zip(&b.abundances) {
                let w = if weighted { xa * yb } else { 1.0 };
                total += w * row[tb];
                weight += w;
            }
        }
        total / weight
    }
}

impl BetaDistance for Mntd {
    fn name(&self) -> &'static str {
        "mntd"
    }

    /// # Algorithm
    /// ```text
    /// nn_A(a) = min_b d(a,b)      nn_B(b) = min_a d(a,b)
    /// unweighted: (Σ nn_A + Σ nn_B) / (|A| + |B|)
    /// weighted:   (Σ (x_a / X) nn_A(a) + Σ (y_b / Y) nn_B(b)) / 2
    /// ```
    /// with `X`, `Y` the community totals, so each side contributes its
    /// relative-abundance-weighted mean regardless of sample size.
    fn between(&self, a: &Community, b: &Community, dist: &LabeledMatrix, weighted: bool) -> f64 {
        if a.is_empty() || b.is_empty() {
            return f64::NAN;
        }
        let (sum_a, sum_b): (f64, f64) = (a.abundances.iter().sum(), b.abundances.iter().sum());
        let mut total = 0.0;
        let mut weight = 0.0;
        let mut nearest_in_a = vec![f64::INFINITY; b.taxa.len()];
        for (&ta, &xa) in a.taxa.iter().zip(&a.abundances) {
            let row = &dist.values[ta];
            let mut nearest = f64::INFINITY;
            for (k, &tb) in b.taxa.iter().enumerate() {
                let d = row[tb];
                nearest = nearest.min(d);
                nearest_in_a[k] = nearest_in_a[k].min(d);
            }
            let w = if weighted { xa / sum_a } else { 1.0 };
            total += w * nearest;
            weight += w;
        }
        for (&nn, &yb) in nearest_in_a.iter().zip(&b.abundances) {
            let w = if weighted { yb / sum_b } else { 1.0 };
            total += w * nn;
            weight += w;
        }
        total / weight
    }
}

/// Which kernel to run. Parsed from the CLI and the Python layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Mpd,
    Mntd,
}

impl Metric {
    pub fn kernel(self) -> &'static dyn BetaDistance {
        match self {
            Metric::Mpd => &Mpd,
            Metric::Mntd => &Mntd,
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = SesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mpd" | "comdist" => Ok(Metric::Mpd),
            "mntd" | "comdistnt" => Ok(Metric::Mntd),
            other => Err(SesError::InvalidParameter(format!(
                "unknown metric '{other}' (expected mpd or mntd)"
            ))),
        }
    }
}

/// Column → distance-matrix row mapping for an abundance matrix.
///
/// Resolved once per run; label permutations of the distance matrix keep the
/// labels in place, so the mapping stays valid for every replicate.
#[derive(Debug, Clone)]
pub struct TaxonIndex(pub Vec<usize>);

impl TaxonIndex {
    /// # Errors
    /// `SesError::MissingTaxa` listing every taxon of `comm` absent from `dist`.
    pub fn resolve(comm: &AbundanceMatrix, dist: &LabeledMatrix) -> Result<Self> {
        let lookup = dist.index();
        let mut missing = Vec::new();
        let idx = comm
            .taxa
            .iter()
            .map(|t| match lookup.get(t.as_str()) {
                Some(&i) => i,
                None => {
                    missing.push(t.clone());
                    0
                }
            })
            .collect();
        if missing.is_empty() { Ok(TaxonIndex(idx)) } else { Err(SesError::MissingTaxa(missing)) }
    }

    /// Resolve every sample of `comm` into a [`Community`].
    pub fn communities(&self, comm: &AbundanceMatrix) -> Vec<Community> {
        comm.values
            .iter()
            .map(|row| {
                let mut c = Community::default();
                for (col, &x) in row.iter().enumerate() {
                    if x > 0.0 {
                        c.taxa.push(self.0[col]);
                        c.abundances.push(x);
                    }
                }
                c
            })
            .collect()
    }
}

/// Compute the symmetric between-sample distance matrix in parallel.
///
/// Pairs `(i, j)` with `i < j` are distributed over the rayon pool; the
/// diagonal is 0 and pairs involving an empty sample are NA.
pub fn compute_pairwise_parallel(
    kernel: &dyn BetaDistance,
    comm: &AbundanceMatrix,
    dist: &LabeledMatrix,
    index: &TaxonIndex,
    weighted: bool,
) -> LabeledMatrix {
    let communities = index.communities(comm);
    let n = communities.len();

    let pairs: Vec<(usize, usize, f64)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| (i, j, kernel.between(&communities[i], &communities[j], dist, weighted)))
        .collect();

    LabeledMatrix::from_pairs(comm.samples.clone(), pairs, 0.0)
}

/// Observed between-sample distances: resolves taxa, then runs the kernel.
///
/// # Errors
/// Returns `SesError::MissingTaxa` if the distance matrix lacks any taxon of
/// the abundance matrix.
pub fn pairwise_distance(
    kernel: &dyn BetaDistance,
    comm: &AbundanceMatrix,
    dist: &LabeledMatrix,
    weighted: bool,
) -> Result<LabeledMatrix> {
    let index = TaxonIndex::resolve(comm, dist)?;
    Ok(compute_pairwise_parallel(kernel, comm, dist, &index, weighted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// Four taxa on a line: a=0, b=1, c=3, d=6.
    fn line_distances() -> LabeledMatrix {
        let pos = [0.0f64, 1.0, 3.0, 6.0];
        let values = pos
            .iter()
            .map(|x| pos.iter().map(|y| (x - y).abs()).collect())
            .collect();
        LabeledMatrix::new(names(&["a", "b", "c", "d"]), values).unwrap()
    }

    fn comm() -> AbundanceMatrix {
        AbundanceMatrix::new(
            names(&["s1", "s2", "s3"]),
            names(&["a", "b", "c", "d"]),
            vec![
                vec![1.0, 3.0, 0.0, 0.0],
                vec![0.0, 0.0, 2.0, 2.0],
                vec![1.0, 0.0, 0.0, 1.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn mpd_unweighted_by_hand() {
        let d = pairwise_distance(&Mpd, &comm(), &line_distances(), false).unwrap();
        // s1={a,b}, s2={c,d}: (3 + 6 + 2 + 5) / 4
        assert!((d.get(0, 1) - 4.0).abs() < 1e-12);
        // s1={a,b}, s3={a,d}: (0 + 6 + 1 + 5) / 4
        assert!((d.get(0, 2) - 3.0).abs() < 1e-12);
        assert_eq!(d.get(1, 1), 0.0);
    }

    #[test]
    fn mpd_weighted_by_hand() {
        let d = pairwise_distance(&Mpd, &comm(), &line_distances(), true).unwrap();
        // weights a:1 b:3 vs c:2 d:2 → (2*3 + 2*6 + 6*2 + 6*5) / 16
        assert!((d.get(0, 1) - 60.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn mntd_by_hand() {
        let d = pairwise_distance(&Mntd, &comm(), &line_distances(), false).unwrap();
        // s1={a,b} → s2: a→c 3, b→c 2; s2={c,d} → s1: c→b 2, d→b 5
        assert!((d.get(0, 1) - 12.0 / 4.0).abs() < 1e-12);

        let w = pairwise_distance(&Mntd, &comm(), &line_distances(), true).unwrap();
        // ((1*3 + 3*2) / 4 + (2*2 + 2*5) / 4) / 2
        assert!((w.get(0, 1) - 23.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn weighted_mntd_with_unequal_totals() {
        // A = {a:1}, B = {b:1, c:9}: a→b 1; b→a 1, c→a 3
        let a = Community { taxa: vec![0], abundances: vec![1.0] };
        let b = Community { taxa: vec![1, 2], abundances: vec![1.0, 9.0] };
        let d = line_distances();
        let w = Mntd.between(&a, &b, &d, true);
        assert!((w - (1.0 + (0.1 * 1.0 + 0.9 * 3.0)) / 2.0).abs() < 1e-12, "got {w}");
        assert!((w - 1.9).abs() < 1e-12);
        // unweighted stays the plain mean of all three nearest distances
        assert!((Mntd.between(&a, &b, &d, false) - 5.0 / 3.0).abs() < 1e-12);
        assert!((w - Mntd.between(&b, &a, &d, true)).abs() < 1e-12);
    }

    #[test]
    fn symmetric_output() {
        let d = pairwise_distance(&Mntd, &comm(), &line_distances(), true).unwrap();
        for indices in (0..d.len()).combinations(2) {
            let (i, j) = (indices[0], indices[1]);
            assert_eq!(d.get(i, j), d.get(j, i));
        }
    }

    #[test]
    fn empty_sample_is_na() {
        let c = AbundanceMatrix::new(
            names(&["s1", "s2"]),
            names(&["a", "b"]),
            vec![vec![1.0, 1.0], vec![0.0, 0.0]],
        )
        .unwrap();
        let d = pairwise_distance(&Mpd, &c, &line_distances(), false).unwrap();
        assert!(d.get(0, 1).is_nan());
        assert_eq!(d.get(1, 1), 0.0);
    }

    #[test]
    fn missing_taxa_are_reported() {
        let c = AbundanceMatrix::new(names(&["s1"]), names(&["a", "zz", "yy"]), vec![vec![1.0, 1.0, 1.0]]).unwrap();
        match pairwise_distance(&Mpd, &c, &line_distances(), false) {
            Err(SesError::MissingTaxa(t)) => assert_eq!(t, names(&["zz", "yy"])),
            other => panic!("expected MissingTaxa, got {other:?}"),
        }
    }

    #[test]
    fn metric_names() {
        assert_eq!("MPD".parse::<Metric>().unwrap(), Metric::Mpd);
        assert_eq!("comdistnt".parse::<Metric>().unwrap(), Metric::Mntd);
        assert!("unifrac".parse::<Metric>().is_err());
        assert_eq!(Metric::Mntd.kernel().name(), "mntd");
    }
}
