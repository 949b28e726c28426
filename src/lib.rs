//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `matrix`: labeled abundance and square distance matrices.
//! - `distances`: between-community MPD / MNTD kernels behind a common trait.
//! - `nullmodel`: the seven community randomization schemes.
//! - `ses`: standardized effect size engine over parallel null replicates.
//! - `groups`, `permtest`, `bootstrap`: group-level tests on z-matrices.
//! - `tree`, `bitset`: cophenetic distances from a phylogeny.
//! - `io`: TSV / Newick / NEXUS readers and result writers.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod bootstrap;
pub mod distances;
pub mod error;
pub mod groups;
pub mod io;
pub mod matrix;
pub mod nullmodel;
pub mod permtest;
pub mod ses;
pub mod stats;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

pub use bitset::Bitset;
pub use bootstrap::{BootstrapConfig, BootstrapSummary, bootstrap};
pub use distances::{BetaDistance, Metric, Mntd, Mpd, pairwise_distance};
pub use error::{Result, SesError};
pub use groups::GroupLabels;
pub use matrix::{AbundanceMatrix, LabeledMatrix};
pub use nullmodel::{NullModel, SamplePoolMode};
pub use permtest::{GroupTest, PermTestConfig, permtest};
pub use ses::{SesConfig, SesResult, ses_beta};
