//! Python binding layer.
//!
//! Plain lists in, plain lists / dicts out. Every library error surfaces as
//! `ValueError` with the error's message.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::collections::HashMap;

use crate::bootstrap::{BootstrapConfig, Quantile, bootstrap as run_bootstrap};
use crate::distances::Metric;
use crate::error::SesError;
use crate::groups::GroupLabels;
use crate::matrix::{AbundanceMatrix, LabeledMatrix};
use crate::nullmodel::{NullModel, SamplePoolMode};
use crate::permtest::{PermTestConfig, permtest as run_permtest};
use crate::ses::{SesConfig, ses_beta as run_ses};

fn to_py_err(e: SesError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Standardized effect size of between-community MPD or MNTD.
///
/// Args:
///     samples: Sample ids (rows of `abundance`)
///     taxa: Taxon names (columns of `abundance`)
///     abundance: samples x taxa abundance matrix
///     dist_taxa: Taxon names of the distance matrix
///     dist: Square taxa x taxa distance matrix
///     metric: "mpd" or "mntd" (default: "mpd")
///     null_model: One of taxa.labels, richness, frequency, sample.pool,
///         phylogeny.pool, independentswap, trialswap (default: "taxa.labels")
///     abundance_weighted: Weight distances by abundance (default: False)
///     runs: Null replicates (default: 999)
///     iterations: Swaps per replicate for the swap models (default: 1000)
///     cores: Worker threads, 0 for all (default: 0)
///     seed: Random seed (default: 42)
///     sample_pool: "richness" or "pool" (default: "richness")
///
/// Returns:
///     A dict with "samples", "richness", "runs" and the matrices "obs",
///     "rand.mean", "rand.sd", "obs.rank", "obs.z", "obs.p" (NA as NaN).
///
/// Raises:
///     ValueError: On invalid parameters, malformed matrices or missing taxa
#[pyfunction]
#[pyo3(signature = (
    samples, taxa, abundance, dist_taxa, dist,
    metric="mpd", null_model="taxa.labels", abundance_weighted=false,
    runs=999, iterations=1000, cores=0, seed=42, sample_pool="richness"
))]
#[allow(clippy::too_many_arguments)]
fn ses_beta<'py>(
    py: Python<'py>,
    samples: Vec<String>,
    taxa: Vec<String>,
    abundance: Vec<Vec<f64>>,
    dist_taxa: Vec<String>,
    dist: Vec<Vec<f64>>,
    metric: &str,
    null_model: &str,
    abundance_weighted: bool,
    runs: usize,
    iterations: usize,
    cores: usize,
    seed: u64,
    sample_pool: &str,
) -> PyResult<Bound<'py, PyDict>> {
    let metric: Metric = metric.parse().map_err(to_py_err)?;
    let null_model: NullModel = null_model.parse().map_err(to_py_err)?;
    let sample_pool = match sample_pool {
        "richness" => SamplePoolMode::Richness,
        "pool" => SamplePoolMode::Pool,
        other => {
            return Err(PyValueError::new_err(format!(
                "sample_pool must be 'richness' or 'pool', got '{other}'"
            )));
        }
    };
    let config = SesConfig { null_model, abundance_weighted, runs, iterations, cores, seed, sample_pool };

    let comm = AbundanceMatrix::new(samples, taxa, abundance).map_err(to_py_err)?;
    let dist = LabeledMatrix::new(dist_taxa, dist).map_err(to_py_err)?;

    // release the GIL while the replicates run
    let res = py
        .detach(|| run_ses(metric.kernel(), &comm, &dist, &config))
        .map_err(to_py_err)?;

    let out = PyDict::new(py);
    out.set_item("samples", &res.samples)?;
    out.set_item("richness", &res.richness)?;
    out.set_item("runs", res.runs)?;
    for (name, m) in res.matrices() {
        out.set_item(name, &m.values)?;
    }
    Ok(out)
}

fn z_and_groups(labels: Vec<String>, z: Vec<Vec<f64>>, groups: HashMap<String, String>) -> PyResult<(LabeledMatrix, GroupLabels)> {
    let z = LabeledMatrix::new(labels, z).map_err(to_py_err)?;
    let groups = GroupLabels::from_map(&z.labels, &groups).map_err(to_py_err)?;
    Ok((z, groups))
}

/// Permutation test of within- and between-group mean z.
///
/// Args:
///     labels: Sample ids of the z-matrix
///     z: Square z-matrix (NaN for NA)
///     groups: Mapping sample id -> group name
///     permutations: Number of label permutations (default: 999)
///     seed: Random seed (default: 42)
///
/// Returns:
///     A list of dicts with group_a, group_b, kind, n_cells, mean_z,
///     permutations and p_value.
#[pyfunction]
#[pyo3(signature = (labels, z, groups, permutations=999, seed=42))]
fn permtest<'py>(
    py: Python<'py>,
    labels: Vec<String>,
    z: Vec<Vec<f64>>,
    groups: HashMap<String, String>,
    permutations: usize,
    seed: u64,
) -> PyResult<Vec<Bound<'py, PyDict>>> {
    let (z, groups) = z_and_groups(labels, z, groups)?;
    let config = PermTestConfig { permutations, seed };
    let rows = py.detach(|| run_permtest(&z, &groups, &config)).map_err(to_py_err)?;

    rows.into_iter()
        .map(|r| {
            let d = PyDict::new(py);
            d.set_item("group_a", r.group_a)?;
            d.set_item("group_b", r.group_b)?;
            d.set_item("kind", r.kind.as_str())?;
            d.set_item("n_cells", r.n_cells)?;
            d.set_item("mean_z", r.mean_z)?;
            d.set_item("permutations", r.permutations)?;
            d.set_item("p_value", r.p_value)?;
            Ok(d)
        })
        .collect()
}

/// Bootstrap quantiles and BH-adjusted p-values of group mean z.
///
/// Args:
///     labels: Sample ids of the z-matrix
///     z: Square z-matrix (NaN for NA)
///     groups: Mapping sample id -> group name
///     resamples: Bootstrap resamples per comparison (default: 1000)
///     probs: Quantile probabilities (default: [0.025, 0.5, 0.975])
///     seed: Random seed (default: 42)
///
/// Returns:
///     A list of dicts, one per comparison; "quantiles" maps each
///     probability to its bootstrap quantile.
#[pyfunction]
#[pyo3(signature = (labels, z, groups, resamples=1000, probs=vec![0.025, 0.5, 0.975], seed=42))]
fn bootstrap<'py>(
    py: Python<'py>,
    labels: Vec<String>,
    z: Vec<Vec<f64>>,
    groups: HashMap<String, String>,
    resamples: usize,
    probs: Vec<f64>,
    seed: u64,
) -> PyResult<Vec<Bound<'py, PyDict>>> {
    let (z, groups) = z_and_groups(labels, z, groups)?;
    let config = BootstrapConfig { resamples, probs, seed };
    let rows = py.detach(|| run_bootstrap(&z, &groups, &config)).map_err(to_py_err)?;

    rows.into_iter()
        .map(|r| {
            let d = PyDict::new(py);
            d.set_item("group_a", r.group_a)?;
            d.set_item("group_b", r.group_b)?;
            d.set_item("kind", r.kind.as_str())?;
            d.set_item("n_cells", r.n_cells)?;
            d.set_item("mean_z", r.mean_z)?;
            let q = PyDict::new(py);
            for Quantile { prob, value } in r.quantiles {
                q.set_item(prob, value)?;
            }
            d.set_item("quantiles", q)?;
            d.set_item("boot_sd", r.boot_sd)?;
            d.set_item("p_value", r.p_value)?;
            d.set_item("p_adjusted", r.p_adjusted)?;
            d.set_item("frac_opposite", r.frac_opposite)?;
            d.set_item("resamples", r.resamples)?;
            Ok(d)
        })
        .collect()
}

/// Python module definition
#[pymodule]
fn phylo_beta_ses(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(ses_beta, m)?)?;
    m.add_function(wrap_pyfunction!(permtest, m)?)?;
    m.add_function(wrap_pyfunction!(bootstrap, m)?)?;
    Ok(())
}
