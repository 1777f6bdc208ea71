//! Core types for the library.
//!
//! This module contains fundamental type definitions and the SDR (Sparse
//! Distributed Representation) data structure that both the graph store and
//! the pooler operate on.

mod primitives;
mod sdr;

pub use primitives::*;
pub use sdr::*;
