//! Taxon distance matrices from phylogenetic trees.
//!
//! # Overview
//! The SES engine works on a taxa × taxa distance matrix. When the user hands
//! us a Newick tree instead, we derive the cophenetic (patristic) distance:
//! the sum of branch lengths on the path between two tips.
//!
//! # Algorithm
//! ```text
//! d(a, b) = depth(a) + depth(b) - 2 * depth(lca(a, b))
//! ```
//! Rather than querying an LCA per pair, we walk the tree once:
//! 1. Sort tip names alphabetically and map each to a bit index.
//! 2. Top-down pass: root-to-node depth from the parent edges (missing = 0).
//! 3. Bottom-up pass: leaf set (a [`Bitset`]) below every node.
//! 4. At every internal node `v`, tips drawn from two *different* children
//!    have `v` as their LCA, so fill those cells with the formula above.
//!
//! Every pair of tips is visited exactly once, at its LCA.

use crate::bitset::Bitset;
use crate::error::{Result, SesError};
use crate::matrix::LabeledMatrix;
use phylotree::tree::Tree as PhyloTree;
use std::collections::{HashMap, HashSet};

/// Parse a Newick string and return its cophenetic distance matrix.
pub fn cophenetic_from_newick(newick: &str) -> Result<LabeledMatrix> {
    let tree = PhyloTree::from_newick(newick.trim()).map_err(|e| SesError::Tree(e.to_string()))?;
    cophenetic_matrix(&tree)
}

/// Cophenetic distances between all tips, labels sorted alphabetically.
///
/// # Errors
/// Returns `SesError::Tree` if the tree is empty, malformed, or has unnamed
/// or duplicated tip names.
pub fn cophenetic_matrix(tree: &PhyloTree) -> Result<LabeledMatrix> {
    let mut leaves: Vec<(usize, String)> = tree
        .get_leaves()
        .iter()
        .map(|&leaf_id| {
            let name = tree.get(&leaf_id)?.name.clone().filter(|n| !n.is_empty());
            name.map(|n| (leaf_id, n))
                .ok_or_else(|| SesError::Tree(format!("leaf node {leaf_id} has no name")))
        })
        .collect::<Result<Vec<_>>>()?;
    if leaves.is_empty() {
        return Err(SesError::Tree("tree has no leaves".to_string()));
    }
    leaves.sort_by(|a, b| a.1.cmp(&b.1));

    let mut seen = HashSet::new();
    if let Some((_, dup)) = leaves.iter().find(|(_, n)| !seen.insert(n.as_str())) {
        return Err(SesError::Tree(format!("duplicate leaf name '{dup}'")));
    }

    let n = leaves.len();
    let words = n.div_ceil(64);
    let leaf_index: HashMap<usize, usize> =
        leaves.iter().enumerate().map(|(idx, &(node_id, _))| (node_id, idx)).collect();

    let root_id = tree.get_root()?;
    let mut depth: HashMap<usize, f64> = HashMap::new();
    compute_depths(tree, root_id, 0.0, &mut depth)?;

    let mut clades: HashMap<usize, Bitset> = HashMap::new();
    compute_clades(tree, root_id, &leaf_index, words, &mut clades)?;

    let leaf_depth: Vec<f64> = leaves.iter().map(|(id, _)| depth[id]).collect();
    let mut values = vec![vec![0.0; n]; n];

    for (&node_id, node_depth) in &depth {
        let node = tree.get(&node_id)?;
        if node.children.len() < 2 {
            continue;
        }
        let child_sets: Vec<Vec<usize>> = node
            .children
            .iter()
            .map(|c| clades[c].iter_ones().collect())
            .collect();
        for (ci, left) in child_sets.iter().enumerate() {
            for right in &child_sets[ci + 1..] {
                for &a in left {
                    for &b in right {
                        let d = leaf_depth[a] + leaf_depth[b] - 2.0 * node_depth;
                        values[a][b] = d;
                        values[b][a] = d;
                    }
                }
            }
        }
    }

    let labels = leaves.into_iter().map(|(_, name)| name).collect();
    LabeledMatrix::new(labels, values)
}

/// Root-to-node path length for every node.
fn compute_depths(
    tree: &PhyloTree,
    node_id: usize,
    node_depth: f64,
    depth: &mut HashMap<usize, f64>,
) -> Result<()> {
    depth.insert(node_id, node_depth);
    let node = tree.get(&node_id)?;
    for &child_id in &node.children {
        let edge = tree.get(&child_id)?.parent_edge.unwrap_or(0.0);
        compute_depths(tree, child_id, node_depth + edge, depth)?;
    }
    Ok(())
}

/// Leaf set below every node, built bottom-up.
fn compute_clades(
    tree: &PhyloTree,
    node_id: usize,
    leaf_index: &HashMap<usize, usize>,
    words: usize,
    clades: &mut HashMap<usize, Bitset>,
) -> Result<Bitset> {
    let node = tree.get(&node_id)?;
    let mut bitset = Bitset::zeros(words);
    if node.children.is_empty() {
        let idx = leaf_index
            .get(&node_id)
            .ok_or_else(|| SesError::Tree(format!("node {node_id} is a tip but was not listed as a leaf")))?;
        bitset.set(*idx);
    } else {
        for &child_id in &node.children {
            let child = compute_clades(tree, child_id, leaf_index, words, clades)?;
            bitset.or_assign(&child);
        }
    }
    clades.insert(node_id, bitset.clone());
    Ok(bitset)
}
