//! Utility modules for the library.
//!
//! This module contains support machinery used throughout the crate: the
//! deterministic random source and grid-topology helpers.

mod random;
mod topology;

pub use random::Random;
pub use topology::{Neighborhood, Topology, WrappingMode};
