//! MinHash signatures over sparse index sets.
//!
//! The top wavelet coefficients of a spectrogram form a sparse set of
//! positions in a conceptual bit vector. A MinHash signature maps that set
//! to a fixed-length vector: for each of a fixed list of permutations, the
//! signature records the minimum permuted position of the set. Sets with
//! high overlap agree in many signature coordinates, which is what the LSH
//! stage exploits. Signatures are only comparable when produced with the
//! same permutation list, so permutations are persisted alongside the
//! fingerprints they were used for.

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

/// Convenient result alias for MinHash operations.
pub type Result<T> = std::result::Result<T, MinHashError>;

/// A MinHash signature, one entry per permutation.
pub type Fingerprint = Vec<u32>;

/// Errors raised by permutation handling and hashing.
#[derive(Debug, Error)]
pub enum MinHashError {
    /// Permutations of zero length are not allowed.
    #[error("permutations of zero length are not allowed")]
    EmptyPermutation,
    /// The value table is not a bijection of `[0, length)`.
    #[error("value {value} at position {position} breaks the bijection over [0, {length})")]
    InvalidPermutation {
        /// Position of the offending value.
        position: usize,
        /// The offending value (out of range or seen before).
        value: u32,
        /// Length of the permutation.
        length: usize,
    },
    /// An index to permute lies outside the permutation's domain.
    #[error("index {index} is out of range for a permutation of length {length}")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Length of the permutation.
        length: usize,
    },
    /// A permutation text dump contained a non-numeric entry.
    #[error("malformed permutation text: {0}")]
    InvalidText(#[from] std::num::ParseIntError),
    /// The index set to hash was empty, so no minimum exists.
    #[error("cannot hash an empty index set")]
    EmptyIndexSet,
}

/// A bijection of `[0, N)` onto itself, used to permute positions of "1"
/// bits in a sparse bit vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    values: Vec<u32>,
}

impl Permutation {
    /// Wrap an explicit value table, validating that it is a bijection.
    pub fn from_values(values: Vec<u32>) -> Result<Self> {
        if values.is_empty() {
            return Err(MinHashError::EmptyPermutation);
        }
        let length = values.len();
        let mut seen = vec![false; length];
        for (position, &value) in values.iter().enumerate() {
            if value as usize >= length || seen[value as usize] {
                return Err(MinHashError::InvalidPermutation {
                    position,
                    value,
                    length,
                });
            }
            seen[value as usize] = true;
        }
        Ok(Self { values })
    }

    /// Generate a uniformly random permutation of the given length.
    ///
    /// # Panics
    ///
    /// Panics if `length` is zero.
    pub fn random(length: usize, rng: &mut impl Rng) -> Self {
        assert!(length > 0, "permutations of zero length are not allowed");
        let mut values: Vec<u32> = (0..length as u32).collect();
        values.shuffle(rng);
        Self { values }
    }

    /// Parse a permutation from its comma-separated text form.
    pub fn from_text(line: &str) -> Result<Self> {
        let values = line
            .split(',')
            .map(|entry| entry.trim().parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::from_values(values)
    }

    /// Dump the permutation as comma-separated text, the inverse of
    /// [`from_text`](Self::from_text).
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                text.push(',');
            }
            text.push_str(&value.to_string());
        }
        text
    }

    /// Number of positions the permutation covers.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the permutation is empty (never true for a constructed one).
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw value table, for persistence.
    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Map each input index to its permuted position.
    pub fn apply(&self, indices: &[usize]) -> Result<Vec<u32>> {
        indices.iter().map(|&index| self.value_at(index)).collect()
    }

    #[inline]
    fn value_at(&self, index: usize) -> Result<u32> {
        self.values
            .get(index)
            .copied()
            .ok_or(MinHashError::IndexOutOfRange {
                index,
                length: self.values.len(),
            })
    }
}

/// Produces MinHash signatures with a fixed, ordered permutation list.
#[derive(Debug, Clone)]
pub struct MinHasher {
    permutations: Vec<Permutation>,
}

impl MinHasher {
    /// Create a hasher over the given permutations.
    pub fn new(permutations: Vec<Permutation>) -> Self {
        Self { permutations }
    }

    /// Length of the signatures this hasher produces.
    pub fn signature_length(&self) -> usize {
        self.permutations.len()
    }

    /// Compute the signature of the set represented by `indices`: per
    /// permutation, the minimum permuted position.
    pub fn hash(&self, indices: &[usize]) -> Result<Fingerprint> {
        if indices.is_empty() {
            return Err(MinHashError::EmptyIndexSet);
        }
        let mut signature = Vec::with_capacity(self.permutations.len());
        for permutation in &self.permutations {
            let mut min = u32::MAX;
            for &index in indices {
                min = min.min(permutation.value_at(index)?);
            }
            signature.push(min);
        }
        Ok(signature)
    }
}

/// Generate `count` independent random permutations of `length` positions.
pub fn generate_permutations(
    count: usize,
    length: usize,
    rng: &mut impl Rng,
) -> Vec<Permutation> {
    (0..count).map(|_| Permutation::random(length, rng)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn signatures_are_deterministic() {
        let permutations = vec![
            Permutation::from_values(vec![2, 0, 3, 1]).unwrap(),
            Permutation::from_values(vec![3, 1, 0, 2]).unwrap(),
        ];
        let hasher = MinHasher::new(permutations.clone());
        let again = MinHasher::new(permutations);

        let indices = [0, 2];
        assert_eq!(hasher.hash(&indices).unwrap(), again.hash(&indices).unwrap());
        assert_eq!(hasher.hash(&indices).unwrap(), vec![2, 0]);
    }

    #[test]
    fn changing_one_permutation_moves_one_coordinate() {
        let identity = Permutation::from_values(vec![0, 1, 2, 3]).unwrap();
        let swapped = Permutation::from_values(vec![1, 0, 3, 2]).unwrap();

        let indices = [0, 3];
        let base = MinHasher::new(vec![identity.clone(), identity.clone()])
            .hash(&indices)
            .unwrap();
        let changed = MinHasher::new(vec![identity, swapped])
            .hash(&indices)
            .unwrap();

        assert_eq!(base[0], changed[0]);
        assert_ne!(base[1], changed[1]);
    }

    #[test]
    fn hashing_an_empty_set_fails() {
        let hasher = MinHasher::new(vec![Permutation::from_values(vec![0, 1]).unwrap()]);
        assert!(matches!(hasher.hash(&[]), Err(MinHashError::EmptyIndexSet)));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let permutation = Permutation::from_values(vec![1, 0]).unwrap();
        match permutation.apply(&[0, 5]) {
            Err(MinHashError::IndexOutOfRange { index: 5, length: 2 }) => {}
            other => panic!("expected out-of-range error, got {other:?}"),
        }
    }

    #[test]
    fn non_bijections_are_rejected() {
        assert!(matches!(
            Permutation::from_values(vec![0, 2]),
            Err(MinHashError::InvalidPermutation {
                position: 1,
                value: 2,
                length: 2,
            })
        ));
        assert!(matches!(
            Permutation::from_values(vec![1, 1]),
            Err(MinHashError::InvalidPermutation { .. })
        ));
        assert!(matches!(
            Permutation::from_values(vec![]),
            Err(MinHashError::EmptyPermutation)
        ));
    }

    #[test]
    fn random_permutations_are_bijections() {
        let mut rng = SmallRng::seed_from_u64(7);
        for permutation in generate_permutations(5, 64, &mut rng) {
            assert_eq!(permutation.len(), 64);
            let mut sorted = permutation.values().to_vec();
            sorted.sort_unstable();
            let identity: Vec<u32> = (0..64).collect();
            assert_eq!(sorted, identity, "every position must appear exactly once");
        }
    }

    #[test]
    fn text_round_trip_preserves_values() {
        let mut rng = SmallRng::seed_from_u64(13);
        let permutation = Permutation::random(32, &mut rng);
        let parsed = Permutation::from_text(&permutation.to_text()).unwrap();
        assert_eq!(parsed, permutation);

        assert!(Permutation::from_text("3,two,1").is_err());
    }
}
