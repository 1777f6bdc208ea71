//! # Veles - A sparse-coding learning core in Rust
//!
//! Veles implements the learning core of a biologically-inspired sparse-coding
//! engine: a synaptic graph store and a competitive-selection algorithm that
//! turns input activity into fixed-sparsity output activity while continuously
//! reshaping the graph through learning.
//!
//! ## Overview
//!
//! The two central components are:
//!
//! - **SynapseStore**: an incrementally-mutated graph of cells, dendritic
//!   segments and synapses, with index recycling and fast presynaptic lookup.
//! - **SpatialPooler**: computes per-column overlaps against an input SDR,
//!   applies boosting, runs global or local inhibition, and drives learning.
//!
//! Supporting types: the [`types::Sdr`] activity container, a seedable
//! deterministic [`utils::Random`] source, and [`utils::Topology`] helpers for
//! neighborhood enumeration over multi-dimensional grids.
//!
//! ## Quick Start
//!
//! ```rust
//! use veles::prelude::*;
//!
//! let mut sp = SpatialPooler::new(SpatialPoolerParams {
//!     input_dimensions: vec![100],
//!     column_dimensions: vec![400],
//!     potential_radius: 50,
//!     ..Default::default()
//! }).unwrap();
//!
//! let mut input = Sdr::new(&[100]);
//! let mut output = Sdr::new(&[400]);
//!
//! input.set_sparse(&[3, 17, 44, 61, 97]).unwrap();
//! sp.compute(&input, true, &mut output).unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): standard library support
//! - `serde` (default): serialization/deserialization support

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]

pub mod types;
pub mod algorithms;
pub mod utils;

#[cfg(feature = "serde")]
pub mod serialization;

/// Re-export of commonly used types and traits for convenience.
pub mod prelude {
    pub use crate::types::{
        Sdr, SdrDense, SdrSparse, SdrWeight,
        CellIdx, SegmentIdx, SynapseIdx, Segment, Synapse, Permanence,
        Real, Real32, Real64, UInt, UInt16, UInt32, UInt64, Int, Int32, Int64,
    };
    pub use crate::algorithms::{
        SynapseStore, SynapseStoreParams, StoreEventHandler,
        SpatialPooler, SpatialPoolerParams,
    };
    pub use crate::utils::{
        Random,
        Topology, WrappingMode,
    };

    #[cfg(feature = "serde")]
    pub use crate::serialization::{Serializable, SerializableFormat};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library.
pub mod error {
    use thiserror::Error;

    /// Main error type for veles operations.
    #[derive(Error, Debug)]
    pub enum VelesError {
        /// Invalid parameter value or mutually-exclusive parameter combination.
        #[error("Invalid parameter '{name}': {message}")]
        InvalidParameter {
            /// Name of the invalid parameter.
            name: &'static str,
            /// Description of the error.
            message: String,
        },

        /// Index space of the graph is exhausted; unrecoverable.
        #[error("Capacity exhausted for {what}: {size} ids in use")]
        CapacityExceeded {
            /// Which id space ran out.
            what: &'static str,
            /// Number of ids in use.
            size: usize,
        },

        /// Index out of bounds.
        #[error("Index {index} out of bounds (size: {size})")]
        IndexOutOfBounds {
            /// The invalid index.
            index: usize,
            /// The valid size.
            size: usize,
        },

        /// Activity container dimensionality mismatched against the configured
        /// topology.
        #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
        DimensionMismatch {
            /// Expected dimensions.
            expected: Vec<u32>,
            /// Actual dimensions.
            actual: Vec<u32>,
        },

        /// SDR data is invalid (e.g., unsorted sparse indices).
        #[error("Invalid SDR data: {0}")]
        InvalidSdrData(String),

        /// Serialization error.
        #[cfg(feature = "serde")]
        #[error("Serialization error: {message}")]
        SerializationError {
            /// Description of the serialization error.
            message: String,
        },

        /// I/O error.
        #[error("I/O error: {message}")]
        IoError {
            /// Description of the I/O error.
            message: String,
        },

        /// Internal error that should not occur.
        #[error("Internal error: {0}")]
        InternalError(String),
    }

    /// Result type alias using VelesError.
    pub type Result<T> = std::result::Result<T, VelesError>;
}

pub use error::{Result, VelesError};
