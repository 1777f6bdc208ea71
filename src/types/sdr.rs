//! Sparse Distributed Representation (SDR) implementation.
//!
//! An SDR is a data structure representing a group of boolean values (bits).
//! It can be represented in two formats:
//! - **Dense**: A contiguous array of all bits
//! - **Sparse**: A sorted list of indices of active (true) bits
//!
//! The SDR converts between formats lazily and caches the results. Each active
//! bit may optionally carry a small integer weight; unset weights are 1.

use crate::error::{Result, VelesError};
use crate::types::{ElemDense, ElemSparse, Real, SdrWeight, UInt};
use crate::utils::Random;

use std::cell::RefCell;
use std::fmt;

/// Type alias for dense SDR data (array of bytes, 0 or 1).
pub type SdrDense = Vec<ElemDense>;

/// Type alias for sparse SDR data (sorted indices of active bits).
pub type SdrSparse = Vec<ElemSparse>;

/// Internal cache state for lazy evaluation.
#[derive(Default)]
struct SdrCache {
    dense: Option<SdrDense>,
    sparse: Option<SdrSparse>,
}

/// Sparse Distributed Representation.
///
/// A binary vector where typically only a small percentage of bits are active.
/// Both the pooler's input and output boundaries use this type; the input side
/// may attach per-bit weights that the overlap computation accumulates.
///
/// # Example
///
/// ```rust
/// use veles::types::Sdr;
///
/// let mut sdr = Sdr::new(&[10, 10]);
/// sdr.set_sparse(&[1, 4, 8, 15, 42]).unwrap();
///
/// assert_eq!(sdr.get_sum(), 5);
/// let dense = sdr.get_dense();
/// let sparse = sdr.get_sparse();
/// ```
pub struct Sdr {
    /// Dimensions of the SDR.
    dimensions: Vec<UInt>,

    /// Total size (product of dimensions).
    size: usize,

    /// Cached representations (interior mutability for lazy evaluation).
    cache: RefCell<SdrCache>,

    /// Optional weights parallel to the sparse indices. None means all 1.
    sparse_weights: Option<Vec<SdrWeight>>,
}

// Custom serialization for Sdr - dimensions, sparse indices and weights.
#[cfg(feature = "serde")]
mod serde_impl {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct SdrState {
        dimensions: Vec<UInt>,
        sparse: Vec<ElemSparse>,
        weights: Option<Vec<SdrWeight>>,
    }

    impl Serialize for Sdr {
        fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let state = SdrState {
                dimensions: self.dimensions().to_vec(),
                sparse: self.get_sparse(),
                weights: self.raw_sparse_weights().map(<[SdrWeight]>::to_vec),
            };
            state.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Sdr {
        fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let state = SdrState::deserialize(deserializer)?;
            let mut sdr = Sdr::new(&state.dimensions);
            sdr.set_sparse_unchecked(state.sparse);
            sdr.sparse_weights = state.weights;
            Ok(sdr)
        }
    }
}

impl Sdr {
    /// Creates a new SDR with the given dimensions, initialized to all zeros.
    ///
    /// # Arguments
    ///
    /// * `dimensions` - The shape of the SDR (e.g., `&[10, 10]` for 10x10)
    ///
    /// # Panics
    ///
    /// Panics if dimensions is empty or a dimension is zero in a
    /// multi-dimensional SDR.
    #[must_use]
    pub fn new(dimensions: &[UInt]) -> Self {
        assert!(!dimensions.is_empty(), "Dimensions cannot be empty");

        let size: usize = dimensions.iter().map(|&d| d as usize).product();

        // Allow size 0 for placeholder SDRs
        for (i, &dim) in dimensions.iter().enumerate() {
            if dim == 0 && dimensions.len() > 1 {
                panic!("Dimension {} cannot be zero in multi-dimensional SDR", i);
            }
        }

        Self {
            dimensions: dimensions.to_vec(),
            size,
            cache: RefCell::new(SdrCache::default()),
            sparse_weights: None,
        }
    }

    /// Creates a new SDR with dimensions initialized from an iterator.
    pub fn with_dimensions<I>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = UInt>,
    {
        let dims: Vec<UInt> = dimensions.into_iter().collect();
        Self::new(&dims)
    }

    /// Returns the dimensions of this SDR.
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> &[UInt] {
        &self.dimensions
    }

    /// Returns the total number of bits in the SDR.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of dimensions.
    #[inline]
    #[must_use]
    pub fn num_dimensions(&self) -> usize {
        self.dimensions.len()
    }

    /// Reshapes the SDR to new dimensions. The total size must remain the same.
    ///
    /// # Errors
    ///
    /// Returns an error if the new dimensions have a different total size.
    pub fn reshape(&mut self, new_dimensions: &[UInt]) -> Result<()> {
        let new_size: usize = new_dimensions.iter().map(|&d| d as usize).product();

        if new_size != self.size {
            return Err(VelesError::DimensionMismatch {
                expected: self.dimensions.clone(),
                actual: new_dimensions.to_vec(),
            });
        }

        self.dimensions = new_dimensions.to_vec();
        Ok(())
    }

    /// Sets all bits to zero.
    pub fn zero(&mut self) {
        let mut cache = self.cache.borrow_mut();
        cache.dense = Some(vec![0; self.size]);
        cache.sparse = Some(Vec::new());
        drop(cache);
        self.sparse_weights = None;
    }

    // ========================================================================
    // Dense format operations
    // ========================================================================

    /// Sets the SDR value from a dense array.
    ///
    /// # Arguments
    ///
    /// * `data` - A slice of values where non-zero means active
    ///
    /// # Errors
    ///
    /// Returns an error if the data length doesn't match the SDR size.
    pub fn set_dense(&mut self, data: &[ElemDense]) -> Result<()> {
        self.set_dense_owned(data.to_vec())
    }

    /// Sets the SDR value from a dense array, consuming it to avoid copying.
    pub fn set_dense_owned(&mut self, data: SdrDense) -> Result<()> {
        if data.len() != self.size {
            return Err(VelesError::DimensionMismatch {
                expected: vec![self.size as u32],
                actual: vec![data.len() as u32],
            });
        }

        let mut cache = self.cache.borrow_mut();
        cache.dense = Some(data);
        cache.sparse = None;
        drop(cache);
        self.sparse_weights = None;
        Ok(())
    }

    /// Gets the dense representation of the SDR.
    ///
    /// Lazily computes the dense array from the sparse representation if
    /// needed.
    #[must_use]
    pub fn get_dense(&self) -> SdrDense {
        {
            let cache = self.cache.borrow();
            if let Some(ref dense) = cache.dense {
                return dense.clone();
            }
        }

        let sparse = self.get_sparse();
        let mut dense = vec![0u8; self.size];
        for &idx in &sparse {
            dense[idx as usize] = 1;
        }

        let mut cache = self.cache.borrow_mut();
        cache.dense = Some(dense.clone());
        dense
    }

    /// Calls `f` with a reference to the dense representation, computing it
    /// if necessary.
    pub fn with_dense<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&SdrDense) -> R,
    {
        {
            let cache = self.cache.borrow();
            if cache.dense.is_some() {
                return f(cache.dense.as_ref().unwrap());
            }
        }

        let _ = self.get_dense();
        let cache = self.cache.borrow();
        f(cache.dense.as_ref().unwrap())
    }

    // ========================================================================
    // Sparse format operations
    // ========================================================================

    /// Sets the SDR value from sparse indices.
    ///
    /// # Arguments
    ///
    /// * `indices` - Sorted slice of indices of active bits
    ///
    /// # Errors
    ///
    /// Returns an error if indices are not sorted, contain duplicates, or are
    /// out of bounds.
    pub fn set_sparse(&mut self, indices: &[ElemSparse]) -> Result<()> {
        self.set_sparse_owned(indices.to_vec())
    }

    /// Sets the SDR value from sparse indices, consuming to avoid copying.
    pub fn set_sparse_owned(&mut self, indices: SdrSparse) -> Result<()> {
        self.validate_sparse(&indices)?;

        let mut cache = self.cache.borrow_mut();
        cache.sparse = Some(indices);
        cache.dense = None;
        drop(cache);
        self.sparse_weights = None;
        Ok(())
    }

    /// Sets sparse indices without validation (for internal use).
    pub(crate) fn set_sparse_unchecked(&mut self, indices: SdrSparse) {
        let mut cache = self.cache.borrow_mut();
        cache.sparse = Some(indices);
        cache.dense = None;
        drop(cache);
        self.sparse_weights = None;
    }

    /// Validates sparse indices.
    fn validate_sparse(&self, indices: &[ElemSparse]) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }

        let mut prev = indices[0];
        if prev as usize >= self.size {
            return Err(VelesError::IndexOutOfBounds {
                index: prev as usize,
                size: self.size,
            });
        }

        for &idx in &indices[1..] {
            if idx <= prev {
                return Err(VelesError::InvalidSdrData(
                    "Sparse indices must be sorted and unique".to_string(),
                ));
            }
            if idx as usize >= self.size {
                return Err(VelesError::IndexOutOfBounds {
                    index: idx as usize,
                    size: self.size,
                });
            }
            prev = idx;
        }

        Ok(())
    }

    /// Gets the sparse representation of the SDR.
    #[must_use]
    pub fn get_sparse(&self) -> SdrSparse {
        {
            let cache = self.cache.borrow();
            if let Some(ref sparse) = cache.sparse {
                return sparse.clone();
            }
        }

        let sparse = {
            let cache = self.cache.borrow();
            if let Some(ref dense) = cache.dense {
                dense
                    .iter()
                    .enumerate()
                    .filter(|(_, &v)| v != 0)
                    .map(|(i, _)| i as ElemSparse)
                    .collect()
            } else {
                // No data set, return empty
                Vec::new()
            }
        };

        let mut cache = self.cache.borrow_mut();
        cache.sparse = Some(sparse.clone());
        sparse
    }

    /// Calls `f` with a reference to the sparse representation.
    pub fn with_sparse<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&SdrSparse) -> R,
    {
        {
            let cache = self.cache.borrow();
            if cache.sparse.is_some() {
                return f(cache.sparse.as_ref().unwrap());
            }
        }

        let _ = self.get_sparse();
        let cache = self.cache.borrow();
        f(cache.sparse.as_ref().unwrap())
    }

    // ========================================================================
    // Weights
    // ========================================================================

    /// Attaches per-bit weights parallel to the sparse indices.
    ///
    /// Weights are dropped whenever the SDR value changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the weight count differs from the active bit count.
    pub fn set_sparse_weights(&mut self, weights: Vec<SdrWeight>) -> Result<()> {
        let num_active = self.get_sum();
        if weights.len() != num_active {
            return Err(VelesError::DimensionMismatch {
                expected: vec![num_active as u32],
                actual: vec![weights.len() as u32],
            });
        }
        self.sparse_weights = Some(weights);
        Ok(())
    }

    /// Returns the weights parallel to the sparse indices, defaulting to 1
    /// per active bit when no weights were set.
    #[must_use]
    pub fn get_sparse_weights(&self) -> Vec<SdrWeight> {
        match self.sparse_weights {
            Some(ref w) => w.clone(),
            None => vec![1; self.get_sum()],
        }
    }

    /// Returns the attached weights, or None if the SDR is unweighted.
    #[must_use]
    pub fn raw_sparse_weights(&self) -> Option<&[SdrWeight]> {
        self.sparse_weights.as_deref()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns the number of active (true) bits.
    #[must_use]
    pub fn get_sum(&self) -> usize {
        self.with_sparse(Vec::len)
    }

    /// Returns the sparsity (fraction of active bits).
    #[must_use]
    pub fn get_sparsity(&self) -> Real {
        if self.size == 0 {
            return 0.0;
        }
        self.get_sum() as Real / self.size as Real
    }

    /// Returns the number of bits that are active in both SDRs.
    #[must_use]
    pub fn get_overlap(&self, other: &Sdr) -> usize {
        let a = self.get_sparse();
        let b = other.get_sparse();

        // Set intersection of sorted vectors
        let mut count = 0;
        let mut i = 0;
        let mut j = 0;

        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    count += 1;
                    i += 1;
                    j += 1;
                }
            }
        }

        count
    }

    // ========================================================================
    // SDR operations
    // ========================================================================

    /// Copies the value from another SDR.
    ///
    /// # Errors
    ///
    /// Returns an error if dimensions don't match.
    pub fn set_sdr(&mut self, other: &Sdr) -> Result<()> {
        if self.dimensions != other.dimensions {
            return Err(VelesError::DimensionMismatch {
                expected: self.dimensions.clone(),
                actual: other.dimensions.clone(),
            });
        }

        let sparse = other.get_sparse();
        self.set_sparse_owned(sparse)?;
        self.sparse_weights = other.sparse_weights.clone();
        Ok(())
    }

    /// Randomizes the SDR with the given sparsity.
    ///
    /// # Arguments
    ///
    /// * `sparsity` - Fraction of bits to set active (0.0 to 1.0)
    /// * `rng` - Random number generator
    pub fn randomize(&mut self, sparsity: Real, rng: &mut Random) {
        let num_active = ((self.size as Real) * sparsity).round() as usize;

        if num_active == 0 {
            self.zero();
            return;
        }

        if num_active >= self.size {
            let all: SdrSparse = (0..self.size as ElemSparse).collect();
            self.set_sparse_unchecked(all);
            return;
        }

        let indices = rng.sample((0..self.size as ElemSparse).collect(), num_active);
        let mut sparse: SdrSparse = indices;
        sparse.sort_unstable();

        self.set_sparse_unchecked(sparse);
    }

    /// Adds noise to the SDR by moving a fraction of the active bits.
    ///
    /// # Arguments
    ///
    /// * `fraction_noise` - Fraction of active bits to move (0.0 to 1.0)
    /// * `rng` - Random number generator
    pub fn add_noise(&mut self, fraction_noise: Real, rng: &mut Random) {
        let sparse = self.get_sparse();
        let num_active = sparse.len();

        if num_active == 0 || fraction_noise <= 0.0 {
            return;
        }

        let num_to_flip = ((num_active as Real) * fraction_noise).round() as usize;
        if num_to_flip == 0 {
            return;
        }

        let turn_off = rng.sample(sparse.clone(), num_to_flip);

        let active_set: std::collections::HashSet<_> = sparse.iter().copied().collect();
        let inactive: Vec<ElemSparse> = (0..self.size as ElemSparse)
            .filter(|&i| !active_set.contains(&i))
            .collect();

        let turn_on = rng.sample(inactive, num_to_flip);

        let turn_off_set: std::collections::HashSet<_> = turn_off.iter().copied().collect();
        let mut new_sparse: SdrSparse = sparse
            .into_iter()
            .filter(|&i| !turn_off_set.contains(&i))
            .chain(turn_on)
            .collect();
        new_sparse.sort_unstable();

        self.set_sparse_unchecked(new_sparse);
    }
}

impl Clone for Sdr {
    fn clone(&self) -> Self {
        let mut sdr = Sdr::new(&self.dimensions);
        sdr.set_sparse_unchecked(self.get_sparse());
        sdr.sparse_weights = self.sparse_weights.clone();
        sdr
    }
}

impl PartialEq for Sdr {
    fn eq(&self, other: &Self) -> bool {
        self.dimensions == other.dimensions && self.get_sparse() == other.get_sparse()
    }
}

impl Eq for Sdr {}

impl fmt::Debug for Sdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sdr")
            .field("dimensions", &self.dimensions)
            .field("sum", &self.get_sum())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Sdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SDR({:?}) {:?}", self.dimensions, self.get_sparse())
    }
}
