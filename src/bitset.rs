//! Compact bitset of leaf indices.
//!
//! # Overview
//! The tree loader needs, for every internal node, the set of leaves below it:
//! two leaves whose lowest common ancestor is node `v` are exactly the pairs
//! taken from two different children of `v`. Storing those leaf sets as bits
//! keeps the bottom-up pass cheap even for trees with thousands of tips.
//!
//! # Example
//! Leaves [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - clade {A, C} → `0b0101`
//! - clade {B, C, D} → `0b1110`

/// Leaf set backed by `u64` words (64 leaves per word).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Empty set able to hold `words * 64` leaves.
    ///
    /// ```
    /// # use phylo_beta_ses::bitset::Bitset;
    /// let bs = Bitset::zeros(100usize.div_ceil(64));
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Add leaf `idx`.
    #[inline]
    pub fn set(&mut self, idx: usize) {
        self.0[idx >> 6] |= 1u64 << (idx & 63);
    }

    /// `self ∪= other`.
    ///
    /// ```
    /// # use phylo_beta_ses::bitset::Bitset;
    /// let mut left = Bitset::zeros(1);
    /// left.set(0);
    /// let mut right = Bitset::zeros(1);
    /// right.set(1);
    /// left.or_assign(&right);
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Leaf indices in ascending order.
    ///
    /// ```
    /// # use phylo_beta_ses::bitset::Bitset;
    /// let mut bs = Bitset::zeros(2);
    /// bs.set(3);
    /// bs.set(70);
    /// assert_eq!(bs.iter_ones().collect::<Vec<_>>(), vec![3, 70]);
    /// ```
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(w, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(w * 64 + bit)
            })
        })
    }
}
