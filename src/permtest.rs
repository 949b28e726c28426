//! Permutation test of group structure in a z-matrix.
//!
//! # Algorithm
//!
//! 1. Observed statistic: mean z of every within-group and between-group
//!    comparison (upper triangle only, NA cells skipped).
//! 2. Shuffle the sample → group assignment `permutations` times (group sizes
//!    are preserved because the label vector itself is shuffled) and recompute
//!    every comparison's mean.
//! 3. Rank the observed mean among `{observed} ∪ permuted` with average ranks
//!    and turn the rank into a two-sided p-value:
//!    ```text
//!    p_lower = rank / n      p_upper = (n + 1 - rank) / n
//!    p       = min(1, 2 * min(p_lower, p_upper))
//!    ```
//!    where `n` counts the defined values including the observed one.
//!
//! Each permutation owns a generator seeded with `seed + k`, so permutations
//! run in parallel without sharing state.

use crate::error::{Result, SesError};
use crate::groups::{ComparisonKind, Comparisons, GroupLabels, defined_cells};
use crate::matrix::LabeledMatrix;
use crate::stats;
use log::{debug, warn};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermTestConfig {
    pub permutations: usize,
    pub seed: u64,
}

impl Default for PermTestConfig {
    fn default() -> Self {
        Self { permutations: 999, seed: 42 }
    }
}

/// Result row for one comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTest {
    pub group_a: String,
    pub group_b: String,
    pub kind: ComparisonKind,
    /// Defined z cells in the comparison.
    pub n_cells: usize,
    /// Observed mean z; NA when the comparison has no cells.
    pub mean_z: f64,
    pub permutations: usize,
    pub p_value: f64,
}

/// Two-sided rank-based p-value of `observed` against `permuted`.
pub fn two_sided_rank_p(observed: f64, permuted: &[f64]) -> f64 {
    let (rank, n) = stats::average_rank(observed, permuted);
    if rank.is_nan() {
        return f64::NAN;
    }
    let n = n as f64;
    let lower = rank / n;
    let upper = (n + 1.0 - rank) / n;
    (2.0 * lower.min(upper)).min(1.0)
}

/// Permutation test of within- and between-group mean z.
///
/// # Errors
/// `DimensionMismatch` if `groups` does not label every sample of `z`;
/// `InvalidParameter` if `permutations` is zero.
pub fn permtest(z: &LabeledMatrix, groups: &GroupLabels, config: &PermTestConfig) -> Result<Vec<GroupTest>> {
    groups.check_matches(z)?;
    if config.permutations == 0 {
        return Err(SesError::InvalidParameter("permutations must be positive".to_string()));
    }

    let cells = defined_cells(z);
    let comparisons = Comparisons::new(groups.n_groups());
    let observed = comparisons.means(&cells, &groups.assignment);
    let counts: Vec<usize> = comparisons
        .collect_cells(&cells, &groups.assignment)
        .iter()
        .map(Vec::len)
        .collect();
    debug!(
        "Permutation test over {} cells, {} groups, {} comparisons",
        cells.len(),
        groups.n_groups(),
        comparisons.len()
    );

    let permuted: Vec<Vec<f64>> = (0..config.permutations)
        .into_par_iter()
        .map(|k| {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(k as u64));
            let mut assignment = groups.assignment.clone();
            assignment.shuffle(&mut rng);
            comparisons.means(&cells, &assignment)
        })
        .collect();

    let results = comparisons
        .pairs()
        .iter()
        .enumerate()
        .map(|(k, &(a, b))| {
            let null: Vec<f64> = permuted.iter().map(|p| p[k]).collect();
            if counts[k] == 0 {
                warn!("No defined z values between '{}' and '{}'", groups.names[a], groups.names[b]);
            }
            GroupTest {
                group_a: groups.names[a].clone(),
                group_b: groups.names[b].clone(),
                kind: comparisons.kind(k),
                n_cells: counts[k],
                mean_z: observed[k],
                permutations: config.permutations,
                p_value: two_sided_rank_p(observed[k], &null),
            }
        })
        .collect();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{i}")).collect()
    }

    /// z-matrix where samples of the same block are strongly similar (z = -3)
    /// and different blocks strongly dissimilar (z = 3).
    fn block_z(blocks: &[usize]) -> LabeledMatrix {
        let n = blocks.len();
        let values = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        if i == j {
                            f64::NAN
                        } else if blocks[i] == blocks[j] {
                            -3.0 + 0.01 * (i + j) as f64
                        } else {
                            3.0 - 0.01 * (i + j) as f64
                        }
                    })
                    .collect()
            })
            .collect();
        LabeledMatrix::new(names(n), values).unwrap()
    }

    #[test]
    fn single_group_has_no_between_comparisons() {
        let z = block_z(&[0, 0, 0, 0, 0]);
        let groups = GroupLabels::new(&["g"; 5]);
        let res = permtest(&z, &groups, &PermTestConfig { permutations: 199, seed: 1 }).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].kind, ComparisonKind::Within);
        assert_eq!(res[0].n_cells, 5 * 4 / 2);
        // every permutation reproduces the observed statistic
        assert_eq!(res[0].p_value, 1.0);
        assert!(res.iter().all(|r| r.kind != ComparisonKind::Between));
    }

    #[test]
    fn empty_between_comparison_is_na() {
        let mut z = block_z(&[0, 0, 1, 1]);
        for i in 0..2 {
            for j in 2..4 {
                z.values[i][j] = f64::NAN;
                z.values[j][i] = f64::NAN;
            }
        }
        let groups = GroupLabels::new(&["a", "a", "b", "b"]);
        let res = permtest(&z, &groups, &PermTestConfig { permutations: 99, seed: 3 }).unwrap();
        let between = res.iter().find(|r| r.kind == ComparisonKind::Between).unwrap();
        assert_eq!(between.n_cells, 0);
        assert!(between.mean_z.is_nan());
        assert!(between.p_value.is_nan());
    }

    #[test]
    fn detects_block_structure() {
        let blocks = [0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1];
        let z = block_z(&blocks);
        let labels: Vec<&str> = blocks.iter().map(|&b| if b == 0 { "forest" } else { "meadow" }).collect();
        let groups = GroupLabels::new(&labels);
        let res = permtest(&z, &groups, &PermTestConfig { permutations: 999, seed: 42 }).unwrap();
        assert_eq!(res.len(), 3);
        for r in &res {
            assert!(r.p_value > 0.0 && r.p_value <= 1.0);
            assert!(r.p_value < 0.05, "{} vs {}: p = {}", r.group_a, r.group_b, r.p_value);
        }
        let between = &res[1];
        assert_eq!((between.group_a.as_str(), between.group_b.as_str()), ("forest", "meadow"));
        assert_eq!(between.n_cells, 36);
        assert!(between.mean_z > 2.0);
    }

    #[test]
    fn seed_makes_runs_reproducible() {
        let z = block_z(&[0, 1, 0, 1, 0, 1, 1]);
        let groups = GroupLabels::new(&["a", "b", "a", "b", "b", "a", "a"]);
        let cfg = PermTestConfig { permutations: 99, seed: 9 };
        let a = permtest(&z, &groups, &cfg).unwrap();
        let b = permtest(&z, &groups, &cfg).unwrap();
        let pa: Vec<f64> = a.iter().map(|r| r.p_value).collect();
        let pb: Vec<f64> = b.iter().map(|r| r.p_value).collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn rejects_bad_input() {
        let z = block_z(&[0, 0, 1]);
        let groups = GroupLabels::new(&["a", "b"]);
        assert!(matches!(
            permtest(&z, &groups, &PermTestConfig::default()),
            Err(SesError::DimensionMismatch { .. })
        ));
        let groups = GroupLabels::new(&["a", "a", "b"]);
        assert!(permtest(&z, &groups, &PermTestConfig { permutations: 0, seed: 1 }).is_err());
    }

    #[test]
    fn rank_p_value() {
        // observed is the largest of 1 + 9 values
        let null: Vec<f64> = (0..9).map(f64::from).collect();
        assert!((two_sided_rank_p(100.0, &null) - 0.2).abs() < 1e-12);
        assert!((two_sided_rank_p(-1.0, &null) - 0.2).abs() < 1e-12);
        assert_eq!(two_sided_rank_p(4.0, &null), 1.0);
    }
}
