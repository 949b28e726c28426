//! Bootstrap summaries of within- and between-group z values.
//!
//! For every comparison (see [`crate::groups`]) the defined z values are
//! resampled with replacement `resamples` times and the mean of each resample
//! is kept. From that bootstrap distribution we report:
//!
//! - empirical quantiles at `probs` (type 7 interpolation);
//! - a test of "mean effect differs from 0": z values are already
//!   standardized, so the observed mean divided by the bootstrap standard
//!   error is compared against the standard normal, `p = 2 (1 - Φ(|t|))`;
//! - the fraction of bootstrap means on the other side of zero;
//! - Benjamini-Hochberg adjusted p-values across all comparisons.

use crate::error::{Result, SesError};
use crate::groups::{ComparisonKind, Comparisons, GroupLabels, defined_cells};
use crate::matrix::LabeledMatrix;
use crate::stats;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub resamples: usize,
    pub probs: Vec<f64>,
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { resamples: 1000, probs: vec![0.025, 0.5, 0.975], seed: 42 }
    }
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resamples == 0 {
            return Err(SesError::InvalidParameter("resamples must be positive".to_string()));
        }
        if let Some(p) = self.probs.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(SesError::InvalidParameter(format!("probability {p} is outside [0, 1]")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantile {
    pub prob: f64,
    pub value: f64,
}

/// Result row for one comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSummary {
    pub group_a: String,
    pub group_b: String,
    pub kind: ComparisonKind,
    pub n_cells: usize,
    pub mean_z: f64,
    pub quantiles: Vec<Quantile>,
    /// Standard deviation of the bootstrap means.
    pub boot_sd: f64,
    pub p_value: f64,
    pub p_adjusted: f64,
    /// Fraction of bootstrap means on the opposite side of zero from `mean_z`.
    pub frac_opposite: f64,
    pub resamples: usize,
}

/// Bootstrap every within- and between-group comparison of a z-matrix.
///
/// # Errors
/// `DimensionMismatch` if `groups` does not label every sample of `z`;
/// `InvalidParameter` for zero resamples or probabilities outside `[0, 1]`.
pub fn bootstrap(z: &LabeledMatrix, groups: &GroupLabels, config: &BootstrapConfig) -> Result<Vec<BootstrapSummary>> {
    groups.check_matches(z)?;
    config.validate()?;
    let normal = Normal::new(0.0, 1.0).map_err(|e| SesError::InvalidParameter(e.to_string()))?;

    let comparisons = Comparisons::new(groups.n_groups());
    let values = comparisons.collect_cells(&defined_cells(z), &groups.assignment);
    debug!("Bootstrapping {} comparisons with {} resamples", comparisons.len(), config.resamples);

    let mut results: Vec<BootstrapSummary> = comparisons
        .pairs()
        .par_iter()
        .enumerate()
        .map(|(k, &(a, b))| {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(k as u64));
            let boot = resample_means(&values[k], config.resamples, &mut rng);
            summarize(&values[k], boot, config, &normal, |s| BootstrapSummary {
                group_a: groups.names[a].clone(),
                group_b: groups.names[b].clone(),
                kind: comparisons.kind(k),
                ..s
            })
        })
        .collect();

    let raw: Vec<f64> = results.iter().map(|r| r.p_value).collect();
    for (r, adj) in results.iter_mut().zip(stats::benjamini_hochberg(&raw)) {
        r.p_adjusted = adj;
    }
    Ok(results)
}

/// Means of `resamples` draws with replacement from `values`. Empty input gives no means.
fn resample_means<R: Rng + ?Sized>(values: &[f64], resamples: usize, rng: &mut R) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    (0..resamples)
        .map(|_| (0..n).map(|_| values[rng.gen_range(0..n)]).sum::<f64>() / n as f64)
        .collect()
}

fn summarize(
    values: &[f64],
    mut boot: Vec<f64>,
    config: &BootstrapConfig,
    normal: &Normal,
    label: impl FnOnce(BootstrapSummary) -> BootstrapSummary,
) -> BootstrapSummary {
    let mean_z = stats::mean(values);
    let boot_sd = stats::sd(&boot);
    boot.sort_by(f64::total_cmp);
    let quantiles = config
        .probs
        .iter()
        .map(|&prob| Quantile { prob, value: stats::quantile_sorted(&boot, prob) })
        .collect();

    let p_value = if boot_sd.is_nan() || boot_sd == 0.0 {
        f64::NAN
    } else {
        let t = mean_z / boot_sd;
        (2.0 * (1.0 - normal.cdf(t.abs()))).clamp(0.0, 1.0)
    };
    let frac_opposite = if boot.is_empty() {
        f64::NAN
    } else {
        let opposite = boot
            .iter()
            .filter(|&&m| if mean_z >= 0.0 { m <= 0.0 } else { m >= 0.0 })
            .count();
        opposite as f64 / boot.len() as f64
    };

    label(BootstrapSummary {
        group_a: String::new(),
        group_b: String::new(),
        kind: ComparisonKind::Within,
        n_cells: values.len(),
        mean_z,
        quantiles,
        boot_sd,
        p_value,
        p_adjusted: f64::NAN,
        frac_opposite,
        resamples: config.resamples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn z_matrix(n: usize, f: impl Fn(usize, usize) -> f64) -> LabeledMatrix {
        let labels = (0..n).map(|i| format!("s{i}")).collect();
        let values = (0..n)
            .map(|i| (0..n).map(|j| if i == j { f64::NAN } else { f(i.min(j), i.max(j)) }).collect())
            .collect();
        LabeledMatrix::new(labels, values).unwrap()
    }

    #[test]
    fn quantiles_are_ordered() {
        // group "a" strongly positive, group "b" centred on zero
        let z = z_matrix(10, |i, j| {
            let wobble = ((i * 7 + j * 3) % 5) as f64 - 2.0;
            if i < 5 && j < 5 { 2.5 + 0.3 * wobble } else { 0.5 * wobble }
        });
        let labels: Vec<&str> = (0..10).map(|i| if i < 5 { "a" } else { "b" }).collect();
        let groups = GroupLabels::new(&labels);
        let cfg = BootstrapConfig { resamples: 10_000, ..Default::default() };
        let res = bootstrap(&z, &groups, &cfg).unwrap();
        assert_eq!(res.len(), 3);
        for r in &res {
            assert_eq!(r.quantiles.len(), 3);
            let (lo, med, hi) = (r.quantiles[0].value, r.quantiles[1].value, r.quantiles[2].value);
            assert!(lo <= med && med <= hi, "{} vs {}: {lo} {med} {hi}", r.group_a, r.group_b);
            assert!(r.p_adjusted >= r.p_value);
            assert!(r.p_adjusted <= 1.0);
        }
        let within_a = &res[0];
        assert_eq!(within_a.n_cells, 10);
        assert!(within_a.p_value < 1e-6);
        assert_eq!(within_a.frac_opposite, 0.0);
        assert!(within_a.quantiles[0].value > 2.0);
    }

    #[test]
    fn constant_values_have_no_p_value() {
        let z = z_matrix(4, |_, _| 1.0);
        let groups = GroupLabels::new(&["g", "g", "g", "g"]);
        let res = bootstrap(&z, &groups, &BootstrapConfig::default()).unwrap();
        assert_eq!(res[0].boot_sd, 0.0);
        assert!(res[0].p_value.is_nan());
        assert!(res[0].p_adjusted.is_nan());
        assert_eq!(res[0].quantiles[1].value, 1.0);
    }

    #[test]
    fn empty_comparison_is_na() {
        // singleton groups have no within-group cells
        let z = z_matrix(3, |i, j| (i + j) as f64);
        let groups = GroupLabels::new(&["x", "y", "y"]);
        let res = bootstrap(&z, &groups, &BootstrapConfig::default()).unwrap();
        let within_x = &res[0];
        assert_eq!(within_x.n_cells, 0);
        assert!(within_x.mean_z.is_nan());
        assert!(within_x.quantiles.iter().all(|q| q.value.is_nan()));
        assert!(within_x.p_value.is_nan());
    }

    #[test]
    fn rejects_bad_config() {
        let z = z_matrix(3, |_, _| 0.0);
        let groups = GroupLabels::new(&["a", "a", "b"]);
        let cfg = BootstrapConfig { probs: vec![0.5, 1.5], ..Default::default() };
        assert!(bootstrap(&z, &groups, &cfg).is_err());
        let cfg = BootstrapConfig { resamples: 0, ..Default::default() };
        assert!(bootstrap(&z, &groups, &cfg).is_err());
    }
}
