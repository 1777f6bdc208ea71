//! Core algorithms of the sparse-coding engine.
//!
//! - **SynapseStore**: the cell/segment/synapse connectivity graph
//! - **SpatialPooler**: competitive selection of a fixed-sparsity column
//!   activity pattern, with continuous learning

mod synapse_store;
mod spatial_pooler;

pub use synapse_store::{
    CellData, SegmentData, SlotState, StoreEventHandler, SynapseData, SynapseStore,
    SynapseStoreParams,
};
pub use spatial_pooler::{SpatialPooler, SpatialPoolerParams};
