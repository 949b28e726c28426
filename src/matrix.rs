//! Labeled dense matrices used across the crate.
//!
//! Two shapes show up everywhere:
//! - [`AbundanceMatrix`]: samples (rows) × taxa (columns), one community per row.
//! - [`LabeledMatrix`]: square matrix indexed by one label set, used for taxon
//!   distance matrices as well as every between-sample result (observed,
//!   replicate, mean, sd, rank, z, p).
//!
//! Undefined values (NA) are stored as `f64::NAN`.

use crate::error::{Result, SesError};
use std::collections::{HashMap, HashSet};

/// Absolute tolerance for symmetry and zero-diagonal checks.
pub const SYMMETRY_TOL: f64 = 1e-9;

/// Samples × taxa abundance table.
#[derive(Debug, Clone, PartialEq)]
pub struct AbundanceMatrix {
    pub samples: Vec<String>,
    pub taxa: Vec<String>,
    /// Row-major values: `values[sample][taxon]`.
    pub values: Vec<Vec<f64>>,
}

impl AbundanceMatrix {
    /// Build and validate an abundance matrix.
    ///
    /// # Errors
    /// Returns `SesError` when the shape does not match the labels, labels are
    /// duplicated, or any value is negative or not finite.
    pub fn new(samples: Vec<String>, taxa: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        if values.len() != samples.len() {
            return Err(SesError::DimensionMismatch {
                expected: samples.len(),
                actual: values.len(),
            });
        }
        for row in &values {
            if row.len() != taxa.len() {
                return Err(SesError::DimensionMismatch {
                    expected: taxa.len(),
                    actual: row.len(),
                });
            }
            if let Some(v) = row.iter().find(|v| !v.is_finite() || **v < 0.0) {
                return Err(SesError::InvalidMatrix(format!(
                    "abundances must be finite and non-negative, found {v}"
                )));
            }
        }
        check_unique(&samples, "sample")?;
        check_unique(&taxa, "taxon")?;
        Ok(AbundanceMatrix { samples, taxa, values })
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_taxa(&self) -> usize {
        self.taxa.len()
    }

    /// Number of non-zero taxa in each sample.
    pub fn richness(&self) -> Vec<usize> {
        self.values
            .iter()
            .map(|row| row.iter().filter(|&&v| v > 0.0).count())
            .collect()
    }

    /// Number of samples each taxon occurs in.
    pub fn frequency(&self) -> Vec<usize> {
        (0..self.n_taxa())
            .map(|t| self.values.iter().filter(|row| row[t] > 0.0).count())
            .collect()
    }

    /// Same labels, new values. Used by the null models, which never change shape.
    pub(crate) fn with_values(&self, values: Vec<Vec<f64>>) -> Self {
        AbundanceMatrix {
            samples: self.samples.clone(),
            taxa: self.taxa.clone(),
            values,
        }
    }
}

/// Square matrix with one shared label set for rows and columns.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    pub labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl LabeledMatrix {
    /// Build a square matrix, checking shape and label uniqueness only.
    pub fn new(labels: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        let n = labels.len();
        if values.len() != n {
            return Err(SesError::DimensionMismatch { expected: n, actual: values.len() });
        }
        if let Some(row) = values.iter().find(|row| row.len() != n) {
            return Err(SesError::DimensionMismatch { expected: n, actual: row.len() });
        }
        check_unique(&labels, "label")?;
        Ok(LabeledMatrix { labels, values })
    }

    /// A matrix of NA values over `labels`.
    pub fn filled(labels: Vec<String>, value: f64) -> Self {
        let n = labels.len();
        LabeledMatrix { labels, values: vec![vec![value; n]; n] }
    }

    /// Build a symmetric matrix from upper-triangle entries `(i, j, value)`.
    /// Cells not listed keep `diagonal` on the diagonal and NA elsewhere.
    pub fn from_pairs(labels: Vec<String>, pairs: Vec<(usize, usize, f64)>, diagonal: f64) -> Self {
        let n = labels.len();
        let mut values = vec![vec![f64::NAN; n]; n];
        for (i, row) in values.iter_mut().enumerate() {
            row[i] = diagonal;
        }
        for (i, j, d) in pairs {
            values[i][j] = d;
            values[j][i] = d;
        }
        LabeledMatrix { labels, values }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    /// Position of each label.
    pub fn index(&self) -> HashMap<&str, usize> {
        self.labels.iter().enumerate().map(|(i, l)| (l.as_str(), i)).collect()
    }

    /// Validate a taxon distance matrix: finite, non-negative, symmetric, zero diagonal.
    ///
    /// Every cell is checked, so an NA in either triangle or on the diagonal is rejected.
    pub fn validate_distance(&self) -> Result<()> {
        let n = self.len();
        for (i, row) in self.values.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if !v.is_finite() || v < 0.0 {
                    return Err(SesError::InvalidMatrix(format!(
                        "distance between '{}' and '{}' must be finite and non-negative, found {v}",
                        self.labels[i], self.labels[j]
                    )));
                }
            }
        }
        for i in 0..n {
            if self.values[i][i] > SYMMETRY_TOL {
                return Err(SesError::InvalidMatrix(format!(
                    "diagonal entry for '{}' is {}, expected 0",
                    self.labels[i], self.values[i][i]
                )));
            }
            for j in (i + 1)..n {
                let (a, b) = (self.values[i][j], self.values[j][i]);
                if (a - b).abs() > SYMMETRY_TOL {
                    return Err(SesError::InvalidMatrix(format!(
                        "matrix is not symmetric at ('{}', '{}'): {a} vs {b}",
                        self.labels[i], self.labels[j]
                    )));
                }
            }
        }
        Ok(())
    }

    /// New matrix whose cell `(i, j)` is `self[perm[i]][perm[j]]`, labels unchanged.
    ///
    /// Relabelling the taxa by `perm` leaves the multiset of distances intact.
    pub fn permuted(&self, perm: &[usize]) -> Self {
        let values = perm
            .iter()
            .map(|&pi| perm.iter().map(|&pj| self.values[pi][pj]).collect())
            .collect();
        LabeledMatrix { labels: self.labels.clone(), values }
    }

    /// Upper-triangle values (excluding the diagonal), row by row.
    pub fn upper_triangle(&self) -> Vec<f64> {
        let n = self.len();
        (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| self.values[i][j])
            .collect()
    }
}

fn check_unique(labels: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(labels.len());
    for l in labels {
        if !seen.insert(l.as_str()) {
            return Err(SesError::InvalidMatrix(format!("duplicate {what} label '{l}'")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn richness_and_frequency() {
        let m = AbundanceMatrix::new(
            names(&["s1", "s2"]),
            names(&["a", "b", "c"]),
            vec![vec![1.0, 0.0, 3.0], vec![0.0, 0.0, 2.0]],
        )
        .unwrap();
        assert_eq!(m.richness(), vec![2, 1]);
        assert_eq!(m.frequency(), vec![1, 0, 2]);
    }

    #[test]
    fn rejects_negative_abundance() {
        let err = AbundanceMatrix::new(names(&["s1"]), names(&["a"]), vec![vec![-1.0]]);
        assert!(matches!(err, Err(SesError::InvalidMatrix(_))));
    }

    #[test]
    fn rejects_duplicate_labels() {
        let err = LabeledMatrix::new(names(&["a", "a"]), vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
        assert!(matches!(err, Err(SesError::InvalidMatrix(_))));
    }

    #[test]
    fn distance_validation() {
        let ok = LabeledMatrix::new(names(&["a", "b"]), vec![vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        assert!(ok.validate_distance().is_ok());

        let asym = LabeledMatrix::new(names(&["a", "b"]), vec![vec![0.0, 1.0], vec![2.0, 0.0]]).unwrap();
        assert!(asym.validate_distance().is_err());

        let diag = LabeledMatrix::new(names(&["a", "b"]), vec![vec![0.5, 1.0], vec![1.0, 0.0]]).unwrap();
        assert!(diag.validate_distance().is_err());
    }

    #[test]
    fn distance_validation_rejects_na_anywhere() {
        let base = vec![vec![0.0, 1.0, 2.0], vec![1.0, 0.0, 3.0], vec![2.0, 3.0, 0.0]];
        for (i, j) in [(1, 0), (2, 2), (0, 2)] {
            let mut values = base.clone();
            values[i][j] = f64::NAN;
            let m = LabeledMatrix::new(names(&["a", "b", "c"]), values).unwrap();
            assert!(
                matches!(m.validate_distance(), Err(SesError::InvalidMatrix(_))),
                "NA at ({i}, {j}) accepted"
            );
        }
    }

    #[test]
    fn permuted_keeps_distance_multiset() {
        let m = LabeledMatrix::new(
            names(&["a", "b", "c"]),
            vec![vec![0.0, 1.0, 2.0], vec![1.0, 0.0, 3.0], vec![2.0, 3.0, 0.0]],
        )
        .unwrap();
        let p = m.permuted(&[2, 0, 1]);
        assert_eq!(p.labels, m.labels);
        // (0,1) now holds the old (2,0) distance
        assert_eq!(p.get(0, 1), 2.0);
        let mut a = m.upper_triangle();
        let mut b = p.upper_triangle();
        a.sort_by(f64::total_cmp);
        b.sort_by(f64::total_cmp);
        assert_eq!(a, b);
        assert!(p.validate_distance().is_ok());
    }

    #[test]
    fn from_pairs_is_symmetric() {
        let m = LabeledMatrix::from_pairs(names(&["x", "y", "z"]), vec![(0, 1, 0.5), (1, 2, 0.25)], 0.0);
        assert_eq!(m.get(1, 0), 0.5);
        assert_eq!(m.get(2, 1), 0.25);
        assert!(m.get(0, 2).is_nan());
        assert_eq!(m.get(2, 2), 0.0);
    }
}
