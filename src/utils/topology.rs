//! Topology utilities for spatial computations.
//!
//! This module provides functions for computing neighborhoods and
//! relationships between cells/columns in multi-dimensional grid spaces,
//! plus a precomputed neighbor cache used by local inhibition.

use crate::types::UInt;
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Specifies how grid boundaries are handled in topological computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WrappingMode {
    /// No wrapping - boundaries are hard limits.
    #[default]
    NoWrap,
    /// Wrap around - space is toroidal.
    Wrap,
}

/// Utilities for computing topological relationships.
pub struct Topology;

impl Topology {
    /// Converts a flat index to multi-dimensional coordinates.
    ///
    /// # Example
    ///
    /// ```rust
    /// use veles::utils::Topology;
    ///
    /// let coords = Topology::index_to_coordinates(5, &[3, 3]);
    /// assert_eq!(coords, vec![1, 2]);
    /// ```
    #[must_use]
    pub fn index_to_coordinates(index: usize, dimensions: &[UInt]) -> Vec<UInt> {
        let mut coords = vec![0; dimensions.len()];
        let mut idx = index;

        for i in (0..dimensions.len()).rev() {
            let dim_size = dimensions[i] as usize;
            coords[i] = (idx % dim_size) as UInt;
            idx /= dim_size;
        }

        coords
    }

    /// Converts multi-dimensional coordinates to a flat index.
    #[must_use]
    pub fn coordinates_to_index(coordinates: &[UInt], dimensions: &[UInt]) -> usize {
        let mut index = 0;
        let mut multiplier = 1;

        for i in (0..dimensions.len()).rev() {
            index += coordinates[i] as usize * multiplier;
            multiplier *= dimensions[i] as usize;
        }

        index
    }

    /// Computes the neighborhood of a cell within a given radius.
    ///
    /// Returns all indices within the hypercube of the given radius centered
    /// on the specified center point.
    ///
    /// # Arguments
    ///
    /// * `center_index` - The flat index of the center point
    /// * `dimensions` - The shape of the space
    /// * `radius` - The radius of the neighborhood
    /// * `wrap` - Whether to wrap around boundaries
    /// * `include_center` - Whether to include the center point in results
    #[must_use]
    pub fn neighborhood(
        center_index: usize,
        dimensions: &[UInt],
        radius: UInt,
        wrap: WrappingMode,
        include_center: bool,
    ) -> Vec<usize> {
        let center_coords = Self::index_to_coordinates(center_index, dimensions);
        let mut neighbors = Vec::new();

        Self::neighborhood_recursive(
            &center_coords,
            dimensions,
            radius as i64,
            wrap,
            0,
            &mut vec![0; dimensions.len()],
            &mut neighbors,
        );

        if !include_center {
            neighbors.retain(|&idx| idx != center_index);
        }

        // With wrapping and a radius spanning the grid, offsets can alias
        neighbors.sort_unstable();
        neighbors.dedup();

        neighbors
    }

    fn neighborhood_recursive(
        center: &[UInt],
        dimensions: &[UInt],
        radius: i64,
        wrap: WrappingMode,
        dim: usize,
        current: &mut Vec<UInt>,
        result: &mut Vec<usize>,
    ) {
        if dim == dimensions.len() {
            let idx = Self::coordinates_to_index(current, dimensions);
            result.push(idx);
            return;
        }

        let center_coord = i64::from(center[dim]);
        let dim_size = i64::from(dimensions[dim]);

        for offset in -radius..=radius {
            let coord = center_coord + offset;

            let valid_coord = match wrap {
                WrappingMode::NoWrap => {
                    if coord < 0 || coord >= dim_size {
                        continue;
                    }
                    coord as UInt
                }
                WrappingMode::Wrap => (((coord % dim_size) + dim_size) % dim_size) as UInt,
            };

            current[dim] = valid_coord;
            Self::neighborhood_recursive(center, dimensions, radius, wrap, dim + 1, current, result);
        }
    }

    /// Maps a column index to an input index, distributing columns uniformly
    /// over the input space.
    #[must_use]
    pub fn map_column_to_input(
        column_index: usize,
        column_dimensions: &[UInt],
        input_dimensions: &[UInt],
    ) -> usize {
        let column_coords = Self::index_to_coordinates(column_index, column_dimensions);

        let mut input_coords = Vec::with_capacity(input_dimensions.len());

        for dim in 0..input_dimensions.len() {
            let col_coord = if dim < column_coords.len() {
                f64::from(column_coords[dim])
            } else {
                0.0
            };

            let col_dim = if dim < column_dimensions.len() {
                f64::from(column_dimensions[dim])
            } else {
                1.0
            };

            let input_dim = f64::from(input_dimensions[dim]);

            // Proportional mapping of the column center into the input space
            let input_coord = ((col_coord + 0.5) * input_dim / col_dim).floor() as UInt;
            input_coords.push(input_coord.min(input_dimensions[dim] - 1));
        }

        Self::coordinates_to_index(&input_coords, input_dimensions)
    }

    /// Computes the total number of elements in a dimensional space.
    #[must_use]
    pub fn num_elements(dimensions: &[UInt]) -> usize {
        dimensions.iter().map(|&d| d as usize).product()
    }
}

/// A precomputed neighborhood map for efficient lookups.
///
/// Local inhibition, local boosting and local duty-cycle maintenance all walk
/// each column's neighborhood every call; this cache avoids re-enumerating it.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Neighborhood {
    /// Precomputed neighbors for each cell.
    neighbors: HashMap<usize, Vec<usize>>,
}

impl Neighborhood {
    /// Creates an empty neighborhood cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            neighbors: HashMap::new(),
        }
    }

    /// Creates and populates a neighborhood cache for all cells.
    #[must_use]
    pub fn compute_all(
        dimensions: &[UInt],
        radius: UInt,
        wrap: WrappingMode,
        skip_center: bool,
    ) -> Self {
        let num_cells = Topology::num_elements(dimensions);
        let mut neighbors = HashMap::with_capacity(num_cells);

        for i in 0..num_cells {
            let cell_neighbors = Topology::neighborhood(i, dimensions, radius, wrap, !skip_center);
            neighbors.insert(i, cell_neighbors);
        }

        Self { neighbors }
    }

    /// Gets the neighbors for a cell.
    #[must_use]
    pub fn get(&self, cell: usize) -> Option<&Vec<usize>> {
        self.neighbors.get(&cell)
    }

    /// Returns the number of cells with cached neighbors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Returns whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Clears the cache.
    pub fn clear(&mut self) {
        self.neighbors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_to_coordinates() {
        assert_eq!(Topology::index_to_coordinates(5, &[10]), vec![5]);

        assert_eq!(Topology::index_to_coordinates(0, &[3, 3]), vec![0, 0]);
        assert_eq!(Topology::index_to_coordinates(4, &[3, 3]), vec![1, 1]);
        assert_eq!(Topology::index_to_coordinates(8, &[3, 3]), vec![2, 2]);

        assert_eq!(Topology::index_to_coordinates(13, &[2, 3, 4]), vec![1, 0, 1]);
    }

    #[test]
    fn test_coordinates_to_index() {
        assert_eq!(Topology::coordinates_to_index(&[5], &[10]), 5);

        assert_eq!(Topology::coordinates_to_index(&[0, 0], &[3, 3]), 0);
        assert_eq!(Topology::coordinates_to_index(&[1, 1], &[3, 3]), 4);
        assert_eq!(Topology::coordinates_to_index(&[2, 2], &[3, 3]), 8);

        for i in 0..60 {
            let coords = Topology::index_to_coordinates(i, &[3, 4, 5]);
            let back = Topology::coordinates_to_index(&coords, &[3, 4, 5]);
            assert_eq!(i, back);
        }
    }

    #[test]
    fn test_neighborhood_1d() {
        let neighbors = Topology::neighborhood(5, &[10], 2, WrappingMode::NoWrap, true);
        assert_eq!(neighbors, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_neighborhood_1d_boundary() {
        // At beginning
        let neighbors = Topology::neighborhood(0, &[10], 2, WrappingMode::NoWrap, true);
        assert_eq!(neighbors, vec![0, 1, 2]);

        // With wrapping
        let wrapped = Topology::neighborhood(0, &[10], 2, WrappingMode::Wrap, true);
        assert_eq!(wrapped, vec![0, 1, 2, 8, 9]);
    }

    #[test]
    fn test_neighborhood_wrap_spanning_grid() {
        // Radius covering the whole ring must not produce duplicates
        let neighbors = Topology::neighborhood(1, &[4], 4, WrappingMode::Wrap, true);
        assert_eq!(neighbors, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_neighborhood_2d() {
        let neighbors = Topology::neighborhood(4, &[3, 3], 1, WrappingMode::NoWrap, true);
        assert_eq!(neighbors.len(), 9);

        let no_center = Topology::neighborhood(4, &[3, 3], 1, WrappingMode::NoWrap, false);
        assert_eq!(no_center.len(), 8);
        assert!(!no_center.contains(&4));
    }

    #[test]
    fn test_map_column_to_input() {
        let idx = Topology::map_column_to_input(0, &[10], &[10]);
        assert_eq!(idx, 0);

        let idx = Topology::map_column_to_input(0, &[5], &[10]);
        assert_eq!(idx, 1); // (0.5) * 10 / 5 = 1

        let idx = Topology::map_column_to_input(4, &[5], &[10]);
        assert_eq!(idx, 9); // (4.5) * 10 / 5 = 9
    }

    #[test]
    fn test_num_elements() {
        assert_eq!(Topology::num_elements(&[10]), 10);
        assert_eq!(Topology::num_elements(&[3, 4]), 12);
        assert_eq!(Topology::num_elements(&[2, 3, 4]), 24);
    }

    #[test]
    fn test_neighborhood_cache() {
        // skip_center=true excludes the cell itself from its neighborhood
        let cache = Neighborhood::compute_all(&[5, 5], 1, WrappingMode::NoWrap, true);

        assert_eq!(cache.len(), 25);

        // Center cell (index 12 = position 2,2) has 8 neighbors
        let center_neighbors = cache.get(12).unwrap();
        assert_eq!(center_neighbors.len(), 8);

        // Corner cell (index 0 = position 0,0) has 3 neighbors
        let corner_neighbors = cache.get(0).unwrap();
        assert_eq!(corner_neighbors.len(), 3);
    }
}
