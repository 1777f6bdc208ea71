//! Primitive type definitions shared across the graph store and the pooler.
//!
//! The index widths mirror the data model: cells are addressed by 32-bit
//! indices, segments and synapses get 32-bit flat ids, while per-owner
//! positions and counts fit in 16 bits.

/// 8-bit signed byte.
pub type Byte = i8;

/// 16-bit signed integer.
pub type Int16 = i16;

/// 16-bit unsigned integer.
pub type UInt16 = u16;

/// 32-bit signed integer.
pub type Int32 = i32;

/// 32-bit unsigned integer.
pub type UInt32 = u32;

/// 64-bit signed integer.
pub type Int64 = i64;

/// 64-bit unsigned integer.
pub type UInt64 = u64;

/// 32-bit floating point number.
pub type Real32 = f32;

/// 64-bit floating point number.
pub type Real64 = f64;

/// Default signed integer type.
pub type Int = Int32;

/// Default unsigned integer type.
pub type UInt = UInt32;

/// Default floating point type.
pub type Real = Real32;

/// Index type for cells in the graph.
/// Must match `ElemSparse` for SDR compatibility.
pub type CellIdx = UInt32;

/// Index type for segments within a cell.
pub type SegmentIdx = UInt16;

/// Index type for synapses within a segment; also the overlap count type.
pub type SynapseIdx = UInt16;

/// Unique identifier for a segment in the store's flat list.
pub type Segment = UInt32;

/// Unique identifier for a synapse in the store's flat list.
pub type Synapse = UInt32;

/// Synapse permanence value (0.0 to 1.0).
pub type Permanence = Real32;

/// Minimum permanence value.
pub const MIN_PERMANENCE: Permanence = 0.0;

/// Maximum permanence value.
pub const MAX_PERMANENCE: Permanence = 1.0;

/// Epsilon for floating point comparisons.
pub const EPSILON: Permanence = 1e-6;

/// Element type for dense SDR representation.
pub type ElemDense = u8;

/// Element type for sparse SDR representation (indices).
pub type ElemSparse = UInt32;

/// Per-index activity weight in an SDR. Unset weights default to 1.
pub type SdrWeight = u8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(core::mem::size_of::<CellIdx>(), 4);
        assert_eq!(core::mem::size_of::<SegmentIdx>(), 2);
        assert_eq!(core::mem::size_of::<SynapseIdx>(), 2);
        assert_eq!(core::mem::size_of::<Segment>(), 4);
        assert_eq!(core::mem::size_of::<Synapse>(), 4);
        assert_eq!(core::mem::size_of::<Permanence>(), 4);
    }

    #[test]
    fn test_permanence_bounds() {
        assert!(MIN_PERMANENCE < MAX_PERMANENCE);
        assert!(EPSILON > 0.0);
        assert!(EPSILON < 0.001);
    }
}
