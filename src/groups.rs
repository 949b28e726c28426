//! Sample → group assignments and the comparisons derived from them.
//!
//! A comparison is an unordered pair of groups `(a, b)` with `a <= b`:
//! - `a == b` (within): upper-triangle cells whose two samples are both in `a`;
//! - `a != b` (between): cells with one sample in `a` and the other in `b`.
//!
//! Both post-processors summarise a z-matrix over exactly these cell sets.

use crate::error::{Result, SesError};
use crate::matrix::LabeledMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Group of every sample, as indices into `names`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLabels {
    /// Distinct group names in order of first appearance.
    pub names: Vec<String>,
    /// `assignment[sample] = group index`.
    pub assignment: Vec<usize>,
}

impl GroupLabels {
    /// Build from one label per sample.
    pub fn new<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut names: Vec<String> = Vec::new();
        let mut lookup: HashMap<String, usize> = HashMap::new();
        let assignment = labels
            .iter()
            .map(|l| {
                let l = l.as_ref();
                *lookup.entry(l.to_string()).or_insert_with(|| {
                    names.push(l.to_string());
                    names.len() - 1
                })
            })
            .collect();
        GroupLabels { names, assignment }
    }

    /// Order a `sample → group` map by the given sample labels.
    ///
    /// # Errors
    /// `SesError::InvalidParameter` listing samples without a group.
    pub fn from_map(samples: &[String], map: &HashMap<String, String>) -> Result<Self> {
        let missing: Vec<&str> = samples
            .iter()
            .filter(|s| !map.contains_key(*s))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(SesError::InvalidParameter(format!(
                "no group assigned to samples: {}",
                missing.join(", ")
            )));
        }
        let labels: Vec<&str> = samples.iter().map(|s| map[s].as_str()).collect();
        Ok(GroupLabels::new(&labels))
    }

    pub fn len(&self) -> usize {
        self.assignment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignment.is_empty()
    }

    pub fn n_groups(&self) -> usize {
        self.names.len()
    }

    pub(crate) fn check_matches(&self, z: &LabeledMatrix) -> Result<()> {
        if self.len() != z.len() {
            return Err(SesError::DimensionMismatch { expected: z.len(), actual: self.len() });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonKind {
    Within,
    Between,
}

impl ComparisonKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonKind::Within => "within",
            ComparisonKind::Between => "between",
        }
    }
}

/// All comparisons for `n_groups` groups, indexed densely.
#[derive(Debug, Clone)]
pub struct Comparisons {
    n_groups: usize,
    pairs: Vec<(usize, usize)>,
}

impl Comparisons {
    pub fn new(n_groups: usize) -> Self {
        let pairs = (0..n_groups)
            .flat_map(|a| (a..n_groups).map(move |b| (a, b)))
            .collect();
        Comparisons { n_groups, pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    pub fn kind(&self, k: usize) -> ComparisonKind {
        let (a, b) = self.pairs[k];
        if a == b { ComparisonKind::Within } else { ComparisonKind::Between }
    }

    /// Dense index of the comparison between groups `g` and `h` (any order).
    #[inline]
    pub fn index_of(&self, g: usize, h: usize) -> usize {
        let (a, b) = if g <= h { (g, h) } else { (h, g) };
        // rows 0..a hold n, n-1, ..., n-a+1 entries
        a * self.n_groups - a * (a.saturating_sub(1)) / 2 + (b - a)
    }

    /// Defined z values of every comparison under `assignment`.
    pub fn collect_cells(&self, cells: &[ZCell], assignment: &[usize]) -> Vec<Vec<f64>> {
        let mut out = vec![Vec::new(); self.len()];
        for c in cells {
            out[self.index_of(assignment[c.i], assignment[c.j])].push(c.z);
        }
        out
    }

    /// Mean z of every comparison under `assignment` (NA when it has no cells).
    pub fn means(&self, cells: &[ZCell], assignment: &[usize]) -> Vec<f64> {
        let mut sum = vec![0.0; self.len()];
        let mut count = vec![0usize; self.len()];
        for c in cells {
            let k = self.index_of(assignment[c.i], assignment[c.j]);
            sum[k] += c.z;
            count[k] += 1;
        }
        sum.iter()
            .zip(&count)
            .map(|(&s, &n)| if n == 0 { f64::NAN } else { s / n as f64 })
            .collect()
    }
}

/// One defined upper-triangle cell of a z-matrix.
#[derive(Debug, Clone, Copy)]
pub struct ZCell {
    pub i: usize,
    pub j: usize,
    pub z: f64,
}

/// Defined upper-triangle cells (`i < j`, z not NA).
pub fn defined_cells(z: &LabeledMatrix) -> Vec<ZCell> {
    let n = z.len();
    (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .filter_map(|(i, j)| {
            let v = z.get(i, j);
            (!v.is_nan()).then_some(ZCell { i, j, z: v })
        })
        .collect()
}
