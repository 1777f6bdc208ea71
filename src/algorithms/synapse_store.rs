//! SynapseStore - the synaptic connectivity graph.
//!
//! The store owns a collection of cells, the dendritic segments on those
//! cells, and the synapses on those segments. It is the single mutation point
//! for the graph and provides fast presynaptic lookup so that activity can be
//! propagated without scanning every segment.
//!
//! Each segment and synapse gets a flat id so callers can use plain vectors
//! to associate per-segment values: create a vector of length
//! `segment_flat_list_length()` and index it by segment id.

use crate::error::{Result, VelesError};
use crate::types::{
    CellIdx, Permanence, Sdr, SdrWeight, Segment, SegmentIdx, Synapse, SynapseIdx, EPSILON,
    MAX_PERMANENCE, MIN_PERMANENCE,
};
use crate::utils::Random;

use ahash::AHashMap;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle tag of a synapse slot.
///
/// Slots are never removed from the flat list; destruction marks the slot and
/// recycles its id. The tag backs the fast existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SlotState {
    /// The slot holds a live synapse.
    Active,
    /// The slot was destroyed and its id is awaiting reuse.
    Destroyed,
}

/// Data associated with a synapse.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SynapseData {
    /// The presynaptic cell this synapse gets input from.
    pub presynaptic_cell: CellIdx,

    /// The permanence strength of this synapse.
    pub permanence: Permanence,

    /// The segment this synapse belongs to.
    pub segment: Segment,

    /// Position in whichever presynaptic map list currently holds this
    /// synapse (potential or connected, depending on classification).
    presynaptic_map_index: usize,

    /// Whether the slot is live or recycled.
    state: SlotState,
}

impl SynapseData {
    /// Whether this slot currently holds a live synapse.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SlotState::Active
    }
}

/// Data associated with a segment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentData {
    /// The synapses on this segment (unordered).
    pub synapses: SmallVec<[Synapse; 32]>,

    /// The cell this segment belongs to.
    pub cell: CellIdx,

    /// Number of synapses currently classified as connected.
    pub num_connected: SynapseIdx,
}

impl SegmentData {
    fn new(cell: CellIdx) -> Self {
        Self {
            synapses: SmallVec::new(),
            cell,
            num_connected: 0,
        }
    }
}

/// Data associated with a cell.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellData {
    /// The segments on this cell, in creation order.
    pub segments: SmallVec<[Segment; 8]>,
}

/// Observer capability for graph mutations.
///
/// All methods default to no-ops; implement the ones of interest. Create
/// notifications fire after the entity is fully installed, destroy
/// notifications fire before removal.
pub trait StoreEventHandler {
    /// Called after a segment is created.
    fn on_create_segment(&mut self, _segment: Segment) {}

    /// Called before a segment is destroyed.
    fn on_destroy_segment(&mut self, _segment: Segment) {}

    /// Called after a synapse is created.
    fn on_create_synapse(&mut self, _synapse: Synapse) {}

    /// Called before a synapse is destroyed.
    fn on_destroy_synapse(&mut self, _synapse: Synapse) {}

    /// Called after a synapse's permanence is updated.
    fn on_update_synapse_permanence(&mut self, _synapse: Synapse, _permanence: Permanence) {}
}

/// Parameters for creating a SynapseStore.
#[derive(Debug, Clone)]
pub struct SynapseStoreParams {
    /// Number of cells in the graph.
    pub num_cells: CellIdx,

    /// Permanence threshold at which a synapse counts as connected.
    pub connected_threshold: Permanence,

    /// If true, identical consecutive learning updates are applied only once.
    /// Slowly-moving, highly correlated inputs would otherwise saturate the
    /// permanences.
    pub timeseries: bool,
}

impl Default for SynapseStoreParams {
    fn default() -> Self {
        Self {
            num_cells: 0,
            connected_threshold: 0.5,
            timeseries: false,
        }
    }
}

/// The synaptic connectivity graph.
///
/// Stores cells, segments and synapses along with presynaptic lookup maps
/// used to compute segment activity from active input cells. All graph
/// mutation goes through this type so its consistency invariants hold after
/// every public call.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SynapseStore {
    /// All cells in the graph.
    cells: Vec<CellData>,

    /// All segment slots (indexed by Segment id).
    segments: Vec<SegmentData>,

    /// Destroyed segment ids (available for reuse).
    destroyed_segments: Vec<Segment>,

    /// All synapse slots (indexed by Synapse id).
    synapses: Vec<SynapseData>,

    /// Destroyed synapse ids (available for reuse).
    destroyed_synapses: Vec<Synapse>,

    /// Stored connected threshold. Held slightly below the configured value
    /// so the `>=` classification tolerates floating-point rounding.
    connected_threshold: Permanence,

    /// Iteration counter, advanced by learning activity computations.
    iteration: u32,

    // Presynaptic lookup maps. The synapse and segment lists per cell are
    // parallel; a synapse's `presynaptic_map_index` is its position in the
    // pair that currently holds it.
    /// Maps presynaptic cell -> not-yet-connected synapses from that cell.
    potential_synapses_for_cell: AHashMap<CellIdx, Vec<Synapse>>,

    /// Maps presynaptic cell -> connected synapses from that cell.
    connected_synapses_for_cell: AHashMap<CellIdx, Vec<Synapse>>,

    /// Maps presynaptic cell -> segments of the potential synapses.
    potential_segments_for_cell: AHashMap<CellIdx, Vec<Segment>>,

    /// Maps presynaptic cell -> segments of the connected synapses.
    connected_segments_for_cell: AHashMap<CellIdx, Vec<Segment>>,

    /// Time-series mode for correlated data.
    timeseries: bool,

    /// Per-synapse permanence deltas applied in the previous learning cycle.
    previous_updates: Vec<Permanence>,

    /// Per-synapse permanence deltas applied in the current learning cycle.
    current_updates: Vec<Permanence>,

    /// Number of synapses removed by pruning.
    pruned_synapses: u32,

    /// Number of segments removed by pruning.
    pruned_segments: u32,

    /// Next subscription token.
    #[cfg_attr(feature = "serde", serde(skip))]
    next_event_token: u32,

    /// Subscribed event handlers, keyed by token. Not serialized, cloned or
    /// compared.
    #[cfg_attr(feature = "serde", serde(skip))]
    event_handlers: BTreeMap<u32, Box<dyn StoreEventHandler>>,
}

impl SynapseStore {
    /// Creates a new store with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the connected threshold lies outside the
    /// permanence range.
    pub fn new(params: SynapseStoreParams) -> Result<Self> {
        let mut store = Self {
            cells: Vec::new(),
            segments: Vec::new(),
            destroyed_segments: Vec::new(),
            synapses: Vec::new(),
            destroyed_synapses: Vec::new(),
            connected_threshold: 0.0,
            iteration: 0,
            potential_synapses_for_cell: AHashMap::new(),
            connected_synapses_for_cell: AHashMap::new(),
            potential_segments_for_cell: AHashMap::new(),
            connected_segments_for_cell: AHashMap::new(),
            timeseries: false,
            previous_updates: Vec::new(),
            current_updates: Vec::new(),
            pruned_synapses: 0,
            pruned_segments: 0,
            next_event_token: 0,
            event_handlers: BTreeMap::new(),
        };
        store.initialize(params.num_cells, params.connected_threshold, params.timeseries)?;
        Ok(store)
    }

    /// Creates a store with default parameters and the given cell count.
    #[must_use]
    pub fn with_cells(num_cells: CellIdx) -> Self {
        Self::new(SynapseStoreParams {
            num_cells,
            ..SynapseStoreParams::default()
        })
        .expect("default store parameters are valid")
    }

    /// Resets all state.
    ///
    /// # Errors
    ///
    /// Returns an error if the connected threshold lies outside
    /// `[MIN_PERMANENCE, MAX_PERMANENCE]`; the store is left unchanged.
    pub fn initialize(
        &mut self,
        num_cells: CellIdx,
        connected_threshold: Permanence,
        timeseries: bool,
    ) -> Result<()> {
        if !(MIN_PERMANENCE..=MAX_PERMANENCE).contains(&connected_threshold) {
            return Err(VelesError::InvalidParameter {
                name: "connected_threshold",
                message: format!(
                    "must lie in [{MIN_PERMANENCE}, {MAX_PERMANENCE}], got {connected_threshold}"
                ),
            });
        }

        self.cells = vec![CellData::default(); num_cells as usize];
        self.segments.clear();
        self.destroyed_segments.clear();
        self.synapses.clear();
        self.destroyed_synapses.clear();
        self.potential_synapses_for_cell.clear();
        self.connected_synapses_for_cell.clear();
        self.potential_segments_for_cell.clear();
        self.connected_segments_for_cell.clear();
        self.event_handlers.clear();
        self.next_event_token = 0;
        self.connected_threshold = connected_threshold - EPSILON;
        self.iteration = 0;
        self.timeseries = timeseries;
        self.previous_updates.clear();
        self.current_updates.clear();
        self.pruned_synapses = 0;
        self.pruned_segments = 0;
        Ok(())
    }

    // ========================================================================
    // Counts and scalar accessors
    // ========================================================================

    /// Returns the number of cells.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Returns the stored connected threshold (the configured value minus a
    /// small floating-point safety margin).
    #[inline]
    pub fn connected_threshold(&self) -> Permanence {
        self.connected_threshold
    }

    /// Returns the iteration count, advanced once per learning activity call.
    #[inline]
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Returns the number of live segments.
    pub fn num_segments(&self) -> usize {
        self.segments.len() - self.destroyed_segments.len()
    }

    /// Returns the number of segments on a specific cell.
    pub fn num_segments_on_cell(&self, cell: CellIdx) -> usize {
        self.cells[cell as usize].segments.len()
    }

    /// Returns the number of live synapses.
    pub fn num_synapses(&self) -> usize {
        debug_assert!(self.synapses.len() >= self.destroyed_synapses.len());
        self.synapses.len() - self.destroyed_synapses.len()
    }

    /// Returns the number of synapses on a specific segment.
    pub fn num_synapses_on_segment(&self, segment: Segment) -> usize {
        self.segments[segment as usize].synapses.len()
    }

    /// Returns the vector length needed to index per-segment values by
    /// segment id.
    #[inline]
    pub fn segment_flat_list_length(&self) -> usize {
        self.segments.len()
    }

    /// Returns how many synapses pruning has removed.
    #[inline]
    pub fn num_pruned_synapses(&self) -> u32 {
        self.pruned_synapses
    }

    /// Returns how many segments pruning has removed.
    #[inline]
    pub fn num_pruned_segments(&self) -> u32 {
        self.pruned_segments
    }

    // ========================================================================
    // Event subscription
    // ========================================================================

    /// Registers an event handler, transferring ownership to the store.
    ///
    /// Returns a token for [`unsubscribe`](Self::unsubscribe). Handlers are
    /// notified in subscription order.
    pub fn subscribe(&mut self, handler: Box<dyn StoreEventHandler>) -> u32 {
        let token = self.next_event_token;
        self.next_event_token += 1;
        self.event_handlers.insert(token, handler);
        token
    }

    /// Removes an event handler, returning it to the caller.
    ///
    /// Returns None if the token is unknown.
    pub fn unsubscribe(&mut self, token: u32) -> Option<Box<dyn StoreEventHandler>> {
        self.event_handlers.remove(&token)
    }

    // ========================================================================
    // Segment operations
    // ========================================================================

    /// Creates a new segment on the specified cell.
    ///
    /// While the cell already holds `max_segments_per_cell` or more segments,
    /// the least useful one (smallest sum of squared permanences, ties to the
    /// lowest id) is evicted first. The replacement's id is allocated before
    /// the eviction runs, so the returned id never aliases a segment this
    /// call destroyed.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_segments_per_cell` is Some(0) or the segment
    /// id space is exhausted.
    pub fn create_segment(
        &mut self,
        cell: CellIdx,
        max_segments_per_cell: Option<SegmentIdx>,
    ) -> Result<Segment> {
        if max_segments_per_cell == Some(0) {
            return Err(VelesError::InvalidParameter {
                name: "max_segments_per_cell",
                message: "must be at least 1".to_string(),
            });
        }

        let segment = if let Some(reuse) = self.destroyed_segments.pop() {
            self.segments[reuse as usize] = SegmentData::new(cell);
            reuse
        } else {
            if self.segments.len() >= Segment::MAX as usize {
                return Err(VelesError::CapacityExceeded {
                    what: "segments",
                    size: self.segments.len(),
                });
            }
            let segment = self.segments.len() as Segment;
            self.segments.push(SegmentData::new(cell));
            segment
        };

        if let Some(max) = max_segments_per_cell {
            while self.cells[cell as usize].segments.len() >= max as usize {
                self.evict_least_useful_segment(cell);
            }
        }

        self.cells[cell as usize].segments.push(segment);

        for handler in self.event_handlers.values_mut() {
            handler.on_create_segment(segment);
        }

        Ok(segment)
    }

    /// Evicts the least useful segment from a cell.
    ///
    /// Usefulness is the sum of squared synapse permanences, which favors
    /// keeping segments with many strong synapses; ties go to the lowest id
    /// for determinism.
    fn evict_least_useful_segment(&mut self, cell: CellIdx) {
        let mut least_useful: Option<(f64, Segment)> = None;

        for &segment in &self.cells[cell as usize].segments {
            let mut heuristic = 0.0f64;
            for &synapse in &self.segments[segment as usize].synapses {
                let p = f64::from(self.synapses[synapse as usize].permanence);
                heuristic += p * p;
            }

            let better = match least_useful {
                None => true,
                Some((best, best_segment)) => {
                    heuristic < best || (heuristic == best && segment < best_segment)
                }
            };
            if better {
                least_useful = Some((heuristic, segment));
            }
        }

        if let Some((_, segment)) = least_useful {
            self.destroy_segment(segment);
        }
    }

    /// Destroys a segment and all its synapses; the id is recycled.
    pub fn destroy_segment(&mut self, segment: Segment) {
        for handler in self.event_handlers.values_mut() {
            handler.on_destroy_segment(segment);
        }

        // Destroy synapses from the end of the list to minimize index shifts.
        while let Some(&synapse) = self.segments[segment as usize].synapses.last() {
            self.destroy_synapse(synapse);
        }

        let cell = self.segments[segment as usize].cell;
        let cell_segments = &mut self.cells[cell as usize].segments;
        let pos = cell_segments
            .iter()
            .position(|&s| s == segment)
            .expect("segment to be destroyed is listed on its owning cell");
        // The cell's segment list is ordered, so no swap-removal here.
        cell_segments.remove(pos);

        self.destroyed_segments.push(segment);
    }

    /// Gets the segments for a cell, in creation order.
    #[inline]
    pub fn segments_for_cell(&self, cell: CellIdx) -> &[Segment] {
        &self.cells[cell as usize].segments
    }

    /// Gets the cell that owns a segment.
    #[inline]
    pub fn cell_for_segment(&self, segment: Segment) -> CellIdx {
        self.segments[segment as usize].cell
    }

    /// Gets the segment data.
    #[inline]
    pub fn data_for_segment(&self, segment: Segment) -> &SegmentData {
        &self.segments[segment as usize]
    }

    /// Gets the segment at a specific index on a cell.
    #[inline]
    pub fn get_segment(&self, cell: CellIdx, idx: SegmentIdx) -> Segment {
        self.cells[cell as usize].segments[idx as usize]
    }

    /// Gets the index of a segment on its owning cell.
    pub fn idx_on_cell_for_segment(&self, segment: Segment) -> SegmentIdx {
        let cell = self.segments[segment as usize].cell;
        self.cells[cell as usize]
            .segments
            .iter()
            .position(|&s| s == segment)
            .map(|p| p as SegmentIdx)
            .expect("segment is listed on its owning cell")
    }

    /// Orders two segments by (owning cell, id).
    pub fn compare_segments(&self, a: Segment, b: Segment) -> std::cmp::Ordering {
        let cell_a = self.segments[a as usize].cell;
        let cell_b = self.segments[b as usize].cell;
        cell_a.cmp(&cell_b).then_with(|| a.cmp(&b))
    }

    // ========================================================================
    // Synapse operations
    // ========================================================================

    /// Creates a synapse on a segment, connecting to a presynaptic cell.
    ///
    /// A segment holds at most one synapse per presynaptic cell: synapses are
    /// logically binary, and duplicates would give one input a graded
    /// connection strength. If a synapse to the same cell already exists, its
    /// permanence is raised to the maximum of the old and new values and the
    /// existing id is returned.
    ///
    /// New synapses are inserted disconnected and then raised to the
    /// requested permanence through
    /// [`update_synapse_permanence`](Self::update_synapse_permanence), so map
    /// membership is always maintained by a single code path.
    ///
    /// # Errors
    ///
    /// Returns an error if the synapse id space is exhausted.
    pub fn create_synapse(
        &mut self,
        segment: Segment,
        presynaptic_cell: CellIdx,
        permanence: Permanence,
    ) -> Result<Synapse> {
        let existing = self.segments[segment as usize]
            .synapses
            .iter()
            .find(|&&s| self.synapses[s as usize].presynaptic_cell == presynaptic_cell)
            .copied();

        if let Some(synapse) = existing {
            debug_assert!(self.synapse_exists(synapse));
            if permanence > self.synapses[synapse as usize].permanence {
                self.update_synapse_permanence(synapse, permanence);
            }
            return Ok(synapse);
        }

        let map_index = self
            .potential_synapses_for_cell
            .get(&presynaptic_cell)
            .map_or(0, Vec::len);

        let data = SynapseData {
            presynaptic_cell,
            // Below any valid threshold; the update below classifies it.
            permanence: self.connected_threshold - 1.0,
            segment,
            presynaptic_map_index: map_index,
            state: SlotState::Active,
        };

        let synapse = if let Some(reuse) = self.destroyed_synapses.pop() {
            self.synapses[reuse as usize] = data;
            reuse
        } else {
            if self.synapses.len() >= Synapse::MAX as usize {
                return Err(VelesError::CapacityExceeded {
                    what: "synapses",
                    size: self.synapses.len(),
                });
            }
            let synapse = self.synapses.len() as Synapse;
            self.synapses.push(data);
            synapse
        };

        self.potential_synapses_for_cell
            .entry(presynaptic_cell)
            .or_default()
            .push(synapse);
        self.potential_segments_for_cell
            .entry(presynaptic_cell)
            .or_default()
            .push(segment);

        self.segments[segment as usize].synapses.push(synapse);

        for handler in self.event_handlers.values_mut() {
            handler.on_create_synapse(synapse);
        }

        self.update_synapse_permanence(synapse, permanence);

        Ok(synapse)
    }

    /// Checks whether a synapse still exists on its segment.
    ///
    /// This is the authoritative check; a cheaper tag-based variant backs the
    /// hot paths and is verified against this one under debug assertions.
    pub fn synapse_exists(&self, synapse: Synapse) -> bool {
        // Out of bounds can happen after deserialization trims nothing; ids
        // beyond the flat list never existed.
        if synapse as usize >= self.synapses.len() {
            return false;
        }

        let data = &self.synapses[synapse as usize];
        let found = self.segments[data.segment as usize]
            .synapses
            .contains(&synapse);
        debug_assert_eq!(
            found,
            data.state == SlotState::Active,
            "slot state out of sync with segment membership"
        );
        found
    }

    fn synapse_exists_fast(&self, synapse: Synapse) -> bool {
        if synapse as usize >= self.synapses.len() {
            return false;
        }
        if cfg!(debug_assertions) {
            return self.synapse_exists(synapse);
        }
        self.synapses[synapse as usize].state == SlotState::Active
    }

    /// Destroys a synapse; a no-op if it was already destroyed.
    pub fn destroy_synapse(&mut self, synapse: Synapse) {
        if !self.synapse_exists_fast(synapse) {
            return;
        }

        for handler in self.event_handlers.values_mut() {
            handler.on_destroy_synapse(synapse);
        }

        let (presynaptic_cell, segment, map_index, was_connected) = {
            let data = &self.synapses[synapse as usize];
            (
                data.presynaptic_cell,
                data.segment,
                data.presynaptic_map_index,
                data.permanence >= self.connected_threshold,
            )
        };

        if was_connected {
            self.segments[segment as usize].num_connected -= 1;
        }

        {
            let (syn_map, seg_map) = if was_connected {
                (
                    &mut self.connected_synapses_for_cell,
                    &mut self.connected_segments_for_cell,
                )
            } else {
                (
                    &mut self.potential_synapses_for_cell,
                    &mut self.potential_segments_for_cell,
                )
            };

            if let (Some(pre_synapses), Some(pre_segments)) = (
                syn_map.get_mut(&presynaptic_cell),
                seg_map.get_mut(&presynaptic_cell),
            ) {
                Self::remove_from_presynaptic_map(
                    &mut self.synapses,
                    map_index,
                    pre_synapses,
                    pre_segments,
                );
                if pre_synapses.is_empty() {
                    syn_map.remove(&presynaptic_cell);
                    seg_map.remove(&presynaptic_cell);
                }
            }
        }

        let segment_synapses = &mut self.segments[segment as usize].synapses;
        let pos = segment_synapses
            .iter()
            .position(|&s| s == synapse)
            .expect("live synapse is listed on its segment");
        segment_synapses.swap_remove(pos);

        self.synapses[synapse as usize].state = SlotState::Destroyed;
        self.destroyed_synapses.push(synapse);
    }

    /// Removes a synapse from a presynaptic map pair by moving the last
    /// element over it and fixing up the moved element's back-pointer.
    fn remove_from_presynaptic_map(
        synapses: &mut [SynapseData],
        index: usize,
        pre_synapses: &mut Vec<Synapse>,
        pre_segments: &mut Vec<Segment>,
    ) {
        debug_assert!(!pre_synapses.is_empty());
        debug_assert!(index < pre_synapses.len());
        debug_assert_eq!(pre_synapses.len(), pre_segments.len());

        let moved = pre_synapses[pre_synapses.len() - 1];
        synapses[moved as usize].presynaptic_map_index = index;
        pre_synapses[index] = moved;
        pre_synapses.pop();

        pre_segments[index] = pre_segments[pre_segments.len() - 1];
        pre_segments.pop();
    }

    /// Updates a synapse's permanence, clamped into the valid range.
    ///
    /// When the connected classification flips, the synapse moves between the
    /// potential and connected presynaptic map pairs and the owning segment's
    /// connected count is adjusted. Subscribers are notified on every update,
    /// flip or not.
    pub fn update_synapse_permanence(&mut self, synapse: Synapse, permanence: Permanence) {
        let permanence = permanence.clamp(MIN_PERMANENCE, MAX_PERMANENCE);

        let (presynaptic_cell, segment, before) = {
            let data = &self.synapses[synapse as usize];
            (
                data.presynaptic_cell,
                data.segment,
                data.permanence >= self.connected_threshold,
            )
        };
        let after = permanence >= self.connected_threshold;

        self.synapses[synapse as usize].permanence = permanence;

        if before != after {
            let map_index = self.synapses[synapse as usize].presynaptic_map_index;

            if after {
                self.segments[segment as usize].num_connected += 1;

                {
                    let pre_synapses = self
                        .potential_synapses_for_cell
                        .entry(presynaptic_cell)
                        .or_default();
                    let pre_segments = self
                        .potential_segments_for_cell
                        .entry(presynaptic_cell)
                        .or_default();
                    Self::remove_from_presynaptic_map(
                        &mut self.synapses,
                        map_index,
                        pre_synapses,
                        pre_segments,
                    );
                }

                let connected_synapses = self
                    .connected_synapses_for_cell
                    .entry(presynaptic_cell)
                    .or_default();
                let new_index = connected_synapses.len();
                connected_synapses.push(synapse);
                self.connected_segments_for_cell
                    .entry(presynaptic_cell)
                    .or_default()
                    .push(segment);
                self.synapses[synapse as usize].presynaptic_map_index = new_index;
            } else {
                self.segments[segment as usize].num_connected -= 1;

                {
                    let pre_synapses = self
                        .connected_synapses_for_cell
                        .entry(presynaptic_cell)
                        .or_default();
                    let pre_segments = self
                        .connected_segments_for_cell
                        .entry(presynaptic_cell)
                        .or_default();
                    Self::remove_from_presynaptic_map(
                        &mut self.synapses,
                        map_index,
                        pre_synapses,
                        pre_segments,
                    );
                }

                let potential_synapses = self
                    .potential_synapses_for_cell
                    .entry(presynaptic_cell)
                    .or_default();
                let new_index = potential_synapses.len();
                potential_synapses.push(synapse);
                self.potential_segments_for_cell
                    .entry(presynaptic_cell)
                    .or_default()
                    .push(segment);
                self.synapses[synapse as usize].presynaptic_map_index = new_index;
            }
        }

        for handler in self.event_handlers.values_mut() {
            handler.on_update_synapse_permanence(synapse, permanence);
        }
    }

    /// Gets the synapses on a segment.
    #[inline]
    pub fn synapses_for_segment(&self, segment: Segment) -> &[Synapse] {
        &self.segments[segment as usize].synapses
    }

    /// Gets the segment that owns a synapse.
    #[inline]
    pub fn segment_for_synapse(&self, synapse: Synapse) -> Segment {
        self.synapses[synapse as usize].segment
    }

    /// Gets the synapse data.
    #[inline]
    pub fn data_for_synapse(&self, synapse: Synapse) -> &SynapseData {
        debug_assert!(self.synapse_exists(synapse));
        &self.synapses[synapse as usize]
    }

    /// Gets the distinct presynaptic cells a segment synapses onto, sorted.
    pub fn presynaptic_cells_for_segment(&self, segment: Segment) -> Vec<CellIdx> {
        let mut cells: Vec<CellIdx> = self.segments[segment as usize]
            .synapses
            .iter()
            .map(|&s| self.synapses[s as usize].presynaptic_cell)
            .collect();
        cells.sort_unstable();
        cells.dedup();
        cells
    }

    /// Gets all synapses from a presynaptic cell (potential and connected).
    pub fn synapses_for_presynaptic_cell(&self, cell: CellIdx) -> Vec<Synapse> {
        let mut all = Vec::new();
        if let Some(potential) = self.potential_synapses_for_cell.get(&cell) {
            all.extend_from_slice(potential);
        }
        if let Some(connected) = self.connected_synapses_for_cell.get(&cell) {
            all.extend_from_slice(connected);
        }
        all
    }

    /// Resets the time-series update buffers.
    pub fn reset(&mut self) {
        self.previous_updates.clear();
        self.current_updates.clear();
    }

    // ========================================================================
    // Activity computation
    // ========================================================================

    fn begin_cycle(&mut self, learn: bool) {
        if learn {
            self.iteration += 1;

            if self.timeseries {
                // Rotate the double buffer: last cycle's deltas become the
                // reference for suppressing repeated updates.
                std::mem::swap(&mut self.previous_updates, &mut self.current_updates);
                self.current_updates.clear();
            }
        }
    }

    /// Computes, per segment, the count of connected synapses whose
    /// presynaptic cell is active.
    ///
    /// The result is indexed by segment id and has length
    /// [`segment_flat_list_length`](Self::segment_flat_list_length).
    pub fn compute_activity(
        &mut self,
        active_presynaptic_cells: &[CellIdx],
        learn: bool,
    ) -> Vec<SynapseIdx> {
        self.begin_cycle(learn);

        let mut num_active_connected = vec![0 as SynapseIdx; self.segments.len()];

        for cell in active_presynaptic_cells {
            if let Some(segments) = self.connected_segments_for_cell.get(cell) {
                for &segment in segments {
                    num_active_connected[segment as usize] += 1;
                }
            }
        }

        num_active_connected
    }

    /// Like [`compute_activity`](Self::compute_activity), additionally
    /// accumulating the potential-synapse overlap into a caller-provided
    /// parallel array of length
    /// [`segment_flat_list_length`](Self::segment_flat_list_length).
    pub fn compute_activity_with_potential(
        &mut self,
        num_active_potential: &mut [SynapseIdx],
        active_presynaptic_cells: &[CellIdx],
        learn: bool,
    ) -> Vec<SynapseIdx> {
        assert_eq!(num_active_potential.len(), self.segments.len());

        let num_active_connected = self.compute_activity(active_presynaptic_cells, learn);

        num_active_potential.copy_from_slice(&num_active_connected);
        for cell in active_presynaptic_cells {
            if let Some(segments) = self.potential_segments_for_cell.get(cell) {
                for &segment in segments {
                    num_active_potential[segment as usize] += 1;
                }
            }
        }

        num_active_connected
    }

    /// Computes the weighted connected overlap per segment: each active
    /// presynaptic cell contributes its weight to every segment it is
    /// connected to.
    pub fn compute_activity_weighted(
        &mut self,
        active_presynaptic_cells: &[CellIdx],
        weights: &[SdrWeight],
        learn: bool,
    ) -> Vec<SynapseIdx> {
        debug_assert_eq!(active_presynaptic_cells.len(), weights.len());
        self.begin_cycle(learn);

        let mut overlaps = vec![0 as SynapseIdx; self.segments.len()];

        for (cell, &weight) in active_presynaptic_cells.iter().zip(weights) {
            if let Some(segments) = self.connected_segments_for_cell.get(cell) {
                for &segment in segments {
                    let slot = &mut overlaps[segment as usize];
                    *slot = slot.saturating_add(SynapseIdx::from(weight));
                }
            }
        }

        overlaps
    }

    // ========================================================================
    // Learning operations
    // ========================================================================

    /// Adapts a segment's permanences toward an input pattern.
    ///
    /// Synapses with active presynaptic cells gain `increment`, the rest lose
    /// `decrement`. With `prune_zero_synapses`, synapses whose permanence
    /// would reach the floor are destroyed instead of updated, and the whole
    /// segment is destroyed if fewer than `segment_threshold` synapses
    /// remain afterwards. In time-series mode an update identical to the
    /// previous cycle's update for that synapse is skipped.
    pub fn adapt_segment(
        &mut self,
        segment: Segment,
        inputs: &Sdr,
        increment: Permanence,
        decrement: Permanence,
        prune_zero_synapses: bool,
        segment_threshold: u32,
    ) {
        debug_assert!(
            segment_threshold == 0 || prune_zero_synapses,
            "segment_threshold only applies when pruning is enabled"
        );

        let input_dense = inputs.get_dense();

        if self.timeseries {
            self.previous_updates.resize(self.synapses.len(), MIN_PERMANENCE);
            self.current_updates.resize(self.synapses.len(), MIN_PERMANENCE);
        }

        let synapses: Vec<Synapse> = self.segments[segment as usize]
            .synapses
            .iter()
            .copied()
            .collect();

        let mut destroy_later = Vec::new();

        for synapse in synapses {
            let (presynaptic_cell, permanence) = {
                let data = &self.synapses[synapse as usize];
                (data.presynaptic_cell, data.permanence)
            };

            let update = if input_dense[presynaptic_cell as usize] != 0 {
                increment
            } else {
                -decrement
            };

            // The new value would disconnect the synapse for good.
            if prune_zero_synapses && permanence + update < MIN_PERMANENCE + EPSILON {
                destroy_later.push(synapse);
                self.pruned_synapses += 1;
                continue;
            }

            if self.timeseries {
                if update != self.previous_updates[synapse as usize] {
                    self.update_synapse_permanence(synapse, permanence + update);
                }
                self.current_updates[synapse as usize] = update;
            } else {
                self.update_synapse_permanence(synapse, permanence + update);
            }
        }

        for synapse in destroy_later {
            self.destroy_synapse(synapse);
        }

        if prune_zero_synapses
            && (self.segments[segment as usize].synapses.len() as u32) < segment_threshold
        {
            // Too few synapses left to ever activate again.
            self.destroy_segment(segment);
            self.pruned_segments += 1;
        }
    }

    /// Ensures a segment has at least `segment_threshold` connected synapses.
    ///
    /// Finds the K-th largest permanence (K = min(threshold, synapse count))
    /// and raises every synapse on the segment uniformly by exactly the delta
    /// that connects that synapse, guaranteeing at least K connections in one
    /// pass. No-op if the requirement already holds or the segment is empty.
    pub fn raise_permanences_to_threshold(&mut self, segment: Segment, segment_threshold: u32) {
        if segment_threshold == 0 {
            return;
        }

        let segment_data = &self.segments[segment as usize];
        if u32::from(segment_data.num_connected) >= segment_threshold {
            return;
        }
        if segment_data.synapses.is_empty() {
            return;
        }

        // Pruning may leave fewer synapses than requested; connect as many
        // as the pool allows.
        let threshold = (segment_threshold as usize).min(segment_data.synapses.len());

        let mut scratch: Vec<Synapse> = segment_data.synapses.iter().copied().collect();
        let synapses = &self.synapses;
        scratch.select_nth_unstable_by(threshold - 1, |&a, &b| {
            synapses[b as usize]
                .permanence
                .total_cmp(&synapses[a as usize].permanence)
        });

        let kth = scratch[threshold - 1];
        let increment = self.connected_threshold - self.synapses[kth as usize].permanence;
        if increment <= 0.0 {
            return; // enough synapses already connected
        }

        self.bump_segment(segment, increment);
    }

    /// Drives a segment's connected count into `[min_synapses, max_synapses]`
    /// by shifting all permanences on the segment uniformly.
    ///
    /// Sparsity of the connections decides what a segment can detect: too few
    /// and it detects nothing, too many and it detects everything.
    pub fn synapse_competition(
        &mut self,
        segment: Segment,
        min_synapses: SynapseIdx,
        max_synapses: SynapseIdx,
    ) {
        debug_assert!(min_synapses <= max_synapses);
        debug_assert!(max_synapses > 0);

        let segment_data = &self.segments[segment as usize];
        if segment_data.synapses.is_empty() {
            return;
        }

        let desired_connected = if segment_data.num_connected < min_synapses {
            min_synapses
        } else if segment_data.num_connected > max_synapses {
            max_synapses
        } else {
            return; // already within bounds
        };
        // Cannot connect more synapses than the potential pool holds.
        let desired_connected =
            (desired_connected as usize).min(segment_data.synapses.len());

        let mut permanences: Vec<Permanence> = segment_data
            .synapses
            .iter()
            .map(|&s| self.synapses[s as usize].permanence)
            .collect();

        // The synapse at this ascending rank must land exactly on the
        // threshold for the segment to end up with `desired_connected`
        // connections.
        let rank = permanences.len() - desired_connected;
        let (_, kth, _) = permanences.select_nth_unstable_by(rank, f32::total_cmp);

        let delta = (self.connected_threshold + EPSILON) - *kth;
        self.bump_segment(segment, delta);
    }

    /// Uniformly shifts all permanences on a segment by `delta`.
    pub fn bump_segment(&mut self, segment: Segment, delta: Permanence) {
        let synapses: Vec<Synapse> = self.segments[segment as usize]
            .synapses
            .iter()
            .copied()
            .collect();

        for synapse in synapses {
            let permanence = self.synapses[synapse as usize].permanence + delta;
            self.update_synapse_permanence(synapse, permanence);
        }
    }

    /// Destroys the `n_destroy` synapses with the lowest permanences on a
    /// segment, skipping synapses whose presynaptic cell is in
    /// `exclude_cells`. Ties are broken by the lower id.
    pub fn destroy_min_permanence_synapses(
        &mut self,
        segment: Segment,
        n_destroy: usize,
        exclude_cells: &[CellIdx],
    ) {
        if n_destroy == 0 {
            return;
        }

        let exclude: HashSet<CellIdx> = exclude_cells.iter().copied().collect();

        let mut candidates: Vec<Synapse> = self.segments[segment as usize]
            .synapses
            .iter()
            .copied()
            .filter(|&s| !exclude.contains(&self.synapses[s as usize].presynaptic_cell))
            .collect();

        let synapses = &self.synapses;
        candidates.sort_unstable_by(|&a, &b| {
            synapses[a as usize]
                .permanence
                .total_cmp(&synapses[b as usize].permanence)
                .then(a.cmp(&b))
        });
        candidates.truncate(n_destroy);

        for synapse in candidates {
            self.destroy_synapse(synapse);
        }
    }

    /// Grows synapses from a segment to candidate cells it is not yet
    /// connected to.
    ///
    /// `max_new` subsamples the candidates (shuffled deterministically via
    /// `rng`) to limit connection bursts. With `max_synapses_per_segment`,
    /// low-permanence synapses not among the candidates are destroyed first
    /// to make room.
    ///
    /// # Errors
    ///
    /// Returns an error if the synapse id space is exhausted.
    pub fn grow_synapses(
        &mut self,
        segment: Segment,
        growth_candidates: &[CellIdx],
        initial_permanence: Permanence,
        rng: &mut Random,
        max_new: Option<usize>,
        max_synapses_per_segment: Option<usize>,
    ) -> Result<()> {
        let mut candidates: Vec<CellIdx> = growth_candidates.to_vec();

        let mut n_actual = match max_new {
            Some(m) => m.min(candidates.len()),
            None => candidates.len(),
        };

        if let Some(max) = max_synapses_per_segment {
            debug_assert!(self.num_synapses_on_segment(segment) <= max);
            let current = self.num_synapses_on_segment(segment);
            if current + n_actual > max {
                let overrun = current + n_actual - max;
                self.destroy_min_permanence_synapses(segment, overrun, &candidates);
            }
            // Excluded synapses may have kept the segment fuller than hoped.
            n_actual = n_actual.min(max - self.num_synapses_on_segment(segment));
        }
        if n_actual == 0 {
            return Ok(());
        }

        if let Some(m) = max_new {
            if m < candidates.len() {
                rng.shuffle(&mut candidates);
            }
        }

        let n_desired = self.num_synapses_on_segment(segment) + n_actual;
        for &cell in &candidates {
            // Finishes either by running out of candidates or by reaching the
            // desired count; duplicates don't grow the segment.
            if self.num_synapses_on_segment(segment) == n_desired {
                break;
            }
            self.create_synapse(segment, cell, initial_permanence)?;
        }

        Ok(())
    }
}

impl Clone for SynapseStore {
    /// Clones the graph; event subscriptions are not carried over.
    fn clone(&self) -> Self {
        Self {
            cells: self.cells.clone(),
            segments: self.segments.clone(),
            destroyed_segments: self.destroyed_segments.clone(),
            synapses: self.synapses.clone(),
            destroyed_synapses: self.destroyed_synapses.clone(),
            connected_threshold: self.connected_threshold,
            iteration: self.iteration,
            potential_synapses_for_cell: self.potential_synapses_for_cell.clone(),
            connected_synapses_for_cell: self.connected_synapses_for_cell.clone(),
            potential_segments_for_cell: self.potential_segments_for_cell.clone(),
            connected_segments_for_cell: self.connected_segments_for_cell.clone(),
            timeseries: self.timeseries,
            previous_updates: self.previous_updates.clone(),
            current_updates: self.current_updates.clone(),
            pruned_synapses: self.pruned_synapses,
            pruned_segments: self.pruned_segments,
            next_event_token: 0,
            event_handlers: BTreeMap::new(),
        }
    }
}

impl PartialEq for SynapseStore {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells
            && self.segments == other.segments
            && self.destroyed_segments == other.destroyed_segments
            && self.synapses == other.synapses
            && self.destroyed_synapses == other.destroyed_synapses
            && self.connected_threshold == other.connected_threshold
            && self.iteration == other.iteration
            && self.potential_synapses_for_cell == other.potential_synapses_for_cell
            && self.connected_synapses_for_cell == other.connected_synapses_for_cell
            && self.potential_segments_for_cell == other.potential_segments_for_cell
            && self.connected_segments_for_cell == other.connected_segments_for_cell
            && self.timeseries == other.timeseries
            && self.previous_updates == other.previous_updates
            && self.current_updates == other.current_updates
            && self.pruned_synapses == other.pruned_synapses
            && self.pruned_segments == other.pruned_segments
    }
}

impl std::fmt::Debug for SynapseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynapseStore")
            .field("num_cells", &self.num_cells())
            .field("num_segments", &self.num_segments())
            .field("num_synapses", &self.num_synapses())
            .field("connected_threshold", &self.connected_threshold)
            .field("iteration", &self.iteration)
            .field("timeseries", &self.timeseries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn store_with_threshold(num_cells: CellIdx, threshold: Permanence) -> SynapseStore {
        SynapseStore::new(SynapseStoreParams {
            num_cells,
            connected_threshold: threshold,
            timeseries: false,
        })
        .unwrap()
    }

    #[test]
    fn test_create_store() {
        let store = SynapseStore::with_cells(100);
        assert_eq!(store.num_cells(), 100);
        assert_eq!(store.num_segments(), 0);
        assert_eq!(store.num_synapses(), 0);
    }

    #[test]
    fn test_initialize_rejects_bad_threshold() {
        assert!(SynapseStore::new(SynapseStoreParams {
            num_cells: 10,
            connected_threshold: 1.5,
            timeseries: false,
        })
        .is_err());

        assert!(SynapseStore::new(SynapseStoreParams {
            num_cells: 10,
            connected_threshold: -0.1,
            timeseries: false,
        })
        .is_err());
    }

    #[test]
    fn test_create_segment() {
        let mut store = SynapseStore::with_cells(100);
        let seg = store.create_segment(10, None).unwrap();

        assert_eq!(store.num_segments(), 1);
        assert_eq!(store.cell_for_segment(seg), 10);
        assert_eq!(store.segments_for_cell(10).len(), 1);
        assert_eq!(store.idx_on_cell_for_segment(seg), 0);
    }

    #[test]
    fn test_create_synapse() {
        let mut store = SynapseStore::with_cells(100);
        let seg = store.create_segment(10, None).unwrap();
        let syn = store.create_synapse(seg, 50, 0.5).unwrap();

        assert_eq!(store.num_synapses(), 1);
        assert_eq!(store.segment_for_synapse(syn), seg);
        assert_eq!(store.data_for_synapse(syn).presynaptic_cell, 50);
        assert!((store.data_for_synapse(syn).permanence - 0.5).abs() < 1e-6);
        assert!(store.synapse_exists(syn));
    }

    #[test]
    fn test_connected_count() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.6).unwrap(); // connected
        store.create_synapse(seg, 51, 0.4).unwrap(); // not connected
        store.create_synapse(seg, 52, 0.5).unwrap(); // connected (at threshold)

        assert_eq!(store.data_for_segment(seg).num_connected, 2);
    }

    #[test]
    fn test_update_permanence_moves_classification() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        let syn = store.create_synapse(seg, 50, 0.4).unwrap();

        assert_eq!(store.data_for_segment(seg).num_connected, 0);

        store.update_synapse_permanence(syn, 0.6);
        assert_eq!(store.data_for_segment(seg).num_connected, 1);

        store.update_synapse_permanence(syn, 0.3);
        assert_eq!(store.data_for_segment(seg).num_connected, 0);
    }

    #[test]
    fn test_update_permanence_clamps() {
        let mut store = store_with_threshold(100, 0.5);
        let seg = store.create_segment(0, None).unwrap();
        let syn = store.create_synapse(seg, 5, 0.5).unwrap();

        store.update_synapse_permanence(syn, 7.0);
        assert!((store.data_for_synapse(syn).permanence - MAX_PERMANENCE).abs() < 1e-6);

        store.update_synapse_permanence(syn, -3.0);
        assert!((store.data_for_synapse(syn).permanence - MIN_PERMANENCE).abs() < 1e-6);
    }

    #[test]
    fn test_duplicate_synapse_keeps_max_permanence() {
        let mut store = store_with_threshold(100, 0.5);
        let seg = store.create_segment(10, None).unwrap();

        let syn1 = store.create_synapse(seg, 5, 0.6).unwrap();
        let syn2 = store.create_synapse(seg, 5, 0.3).unwrap();

        assert_eq!(syn1, syn2);
        assert_eq!(store.num_synapses_on_segment(seg), 1);
        assert!((store.data_for_synapse(syn1).permanence - 0.6).abs() < 1e-6);

        // A higher permanence on the duplicate is adopted
        let syn3 = store.create_synapse(seg, 5, 0.9).unwrap();
        assert_eq!(syn1, syn3);
        assert!((store.data_for_synapse(syn1).permanence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_destroy_synapse_is_idempotent() {
        let mut store = SynapseStore::with_cells(100);
        let seg = store.create_segment(10, None).unwrap();
        let syn = store.create_synapse(seg, 50, 0.5).unwrap();

        store.destroy_synapse(syn);
        assert_eq!(store.num_synapses(), 0);
        assert!(!store.synapse_exists(syn));

        // Second destroy is a no-op
        store.destroy_synapse(syn);
        assert_eq!(store.num_synapses(), 0);
    }

    #[test]
    fn test_destroy_segment_cascades() {
        let mut store = SynapseStore::with_cells(100);
        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.5).unwrap();
        store.create_synapse(seg, 51, 0.5).unwrap();

        assert_eq!(store.num_segments(), 1);
        assert_eq!(store.num_synapses(), 2);

        store.destroy_segment(seg);
        assert_eq!(store.num_segments(), 0);
        assert_eq!(store.num_synapses(), 0);
        assert!(store.segments_for_cell(10).is_empty());
    }

    #[test]
    fn test_destroyed_ids_are_recycled() {
        let mut store = SynapseStore::with_cells(100);
        let seg = store.create_segment(10, None).unwrap();
        let syn = store.create_synapse(seg, 50, 0.5).unwrap();

        store.destroy_synapse(syn);
        let syn2 = store.create_synapse(seg, 60, 0.4).unwrap();
        assert_eq!(syn, syn2); // recycled id, clean slate
        assert_eq!(store.data_for_synapse(syn2).presynaptic_cell, 60);

        store.destroy_segment(seg);
        let seg2 = store.create_segment(11, None).unwrap();
        assert_eq!(seg, seg2);
        assert_eq!(store.cell_for_segment(seg2), 11);
        assert_eq!(store.num_synapses_on_segment(seg2), 0);
    }

    #[test]
    fn test_eviction_replacement_gets_fresh_id() {
        // Two creations with a per-cell budget of one: the second call must
        // evict the first segment and the replacement carries a new id.
        let mut store = store_with_threshold(10, 0.5);

        let first = store.create_segment(3, Some(1)).unwrap();
        let second = store.create_segment(3, Some(1)).unwrap();

        assert_ne!(first, second);
        assert_eq!(store.segments_for_cell(3), &[second]);
        assert_eq!(store.num_segments(), 1);
    }

    #[test]
    fn test_eviction_picks_weakest_segment() {
        let mut store = store_with_threshold(10, 0.5);

        let strong = store.create_segment(3, None).unwrap();
        store.create_synapse(strong, 0, 0.9).unwrap();
        store.create_synapse(strong, 1, 0.9).unwrap();

        let weak = store.create_segment(3, None).unwrap();
        store.create_synapse(weak, 2, 0.1).unwrap();

        // Budget of two: creating a third evicts the weak one
        let third = store.create_segment(3, Some(2)).unwrap();

        assert!(store.segments_for_cell(3).contains(&strong));
        assert!(store.segments_for_cell(3).contains(&third));
        assert!(!store.segments_for_cell(3).contains(&weak));
    }

    #[test]
    fn test_eviction_tie_breaks_to_lowest_id() {
        let mut store = store_with_threshold(10, 0.5);

        // Two empty segments have equal (zero) usefulness
        let a = store.create_segment(3, None).unwrap();
        let b = store.create_segment(3, None).unwrap();

        store.create_segment(3, Some(2)).unwrap();

        assert!(!store.segments_for_cell(3).contains(&a.min(b)));
        assert!(store.segments_for_cell(3).contains(&a.max(b)));
    }

    #[test]
    fn test_max_segments_never_exceeded() {
        let mut store = SynapseStore::with_cells(100);
        for _ in 0..10 {
            store.create_segment(7, Some(3)).unwrap();
            assert!(store.num_segments_on_cell(7) <= 3);
        }
    }

    #[test]
    fn test_compute_activity() {
        let mut store = store_with_threshold(100, 0.5);

        let seg1 = store.create_segment(10, None).unwrap();
        store.create_synapse(seg1, 50, 0.6).unwrap();
        store.create_synapse(seg1, 51, 0.6).unwrap();
        store.create_synapse(seg1, 52, 0.4).unwrap(); // not connected

        let seg2 = store.create_segment(20, None).unwrap();
        store.create_synapse(seg2, 50, 0.6).unwrap();

        let activity = store.compute_activity(&[50, 51, 53], true);

        assert_eq!(activity[seg1 as usize], 2);
        assert_eq!(activity[seg2 as usize], 1);
        assert_eq!(store.iteration(), 1);

        // learn=false leaves the iteration counter alone
        store.compute_activity(&[50], false);
        assert_eq!(store.iteration(), 1);
    }

    #[test]
    fn test_compute_activity_with_potential() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.6).unwrap(); // connected
        store.create_synapse(seg, 51, 0.2).unwrap(); // potential only

        let mut potential = vec![0; store.segment_flat_list_length()];
        let connected = store.compute_activity_with_potential(&mut potential, &[50, 51], true);

        assert_eq!(connected[seg as usize], 1);
        assert_eq!(potential[seg as usize], 2);
    }

    #[test]
    fn test_compute_activity_weighted() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.6).unwrap();
        store.create_synapse(seg, 51, 0.6).unwrap();

        let overlaps = store.compute_activity_weighted(&[50, 51], &[3, 5], true);
        assert_eq!(overlaps[seg as usize], 8);
    }

    #[test]
    fn test_adapt_segment() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        let syn1 = store.create_synapse(seg, 50, 0.5).unwrap();
        let syn2 = store.create_synapse(seg, 51, 0.5).unwrap();

        let mut input = Sdr::new(&[100]);
        input.set_sparse(&[50]).unwrap();

        store.adapt_segment(seg, &input, 0.1, 0.1, false, 0);

        assert!((store.data_for_synapse(syn1).permanence - 0.6).abs() < 1e-6);
        assert!((store.data_for_synapse(syn2).permanence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_adapt_segment_prunes_floored_synapses() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.05).unwrap();
        store.create_synapse(seg, 51, 0.9).unwrap();

        let mut input = Sdr::new(&[100]);
        input.set_sparse(&[51]).unwrap();

        store.adapt_segment(seg, &input, 0.1, 0.1, true, 0);

        // Synapse onto 50 dropped to the floor and was destroyed
        assert_eq!(store.num_synapses_on_segment(seg), 1);
        assert_eq!(store.num_pruned_synapses(), 1);
    }

    #[test]
    fn test_adapt_segment_destroys_depleted_segment() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.05).unwrap();
        store.create_synapse(seg, 51, 0.05).unwrap();

        let input = Sdr::new(&[100]); // nothing active

        store.adapt_segment(seg, &input, 0.1, 0.1, true, 2);

        assert_eq!(store.num_segments(), 0);
        assert_eq!(store.num_pruned_segments(), 1);
    }

    #[test]
    fn test_timeseries_suppresses_repeated_update() {
        let mut store = SynapseStore::new(SynapseStoreParams {
            num_cells: 100,
            connected_threshold: 0.5,
            timeseries: true,
        })
        .unwrap();

        let seg = store.create_segment(10, None).unwrap();
        let syn = store.create_synapse(seg, 50, 0.3).unwrap();

        let mut input = Sdr::new(&[100]);
        input.set_sparse(&[50]).unwrap();

        // First cycle applies the increment
        store.compute_activity(&input.get_sparse(), true);
        store.adapt_segment(seg, &input, 0.1, 0.1, false, 0);
        assert!((store.data_for_synapse(syn).permanence - 0.4).abs() < 1e-6);

        // Identical second cycle is suppressed
        store.compute_activity(&input.get_sparse(), true);
        store.adapt_segment(seg, &input, 0.1, 0.1, false, 0);
        assert!((store.data_for_synapse(syn).permanence - 0.4).abs() < 1e-6);

        // A different input resumes updating
        let mut other = Sdr::new(&[100]);
        other.set_sparse(&[51]).unwrap();
        store.compute_activity(&other.get_sparse(), true);
        store.adapt_segment(seg, &other, 0.1, 0.1, false, 0);
        assert!((store.data_for_synapse(syn).permanence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_raise_permanences_to_threshold() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.4).unwrap();
        store.create_synapse(seg, 51, 0.3).unwrap();
        store.create_synapse(seg, 52, 0.2).unwrap();

        assert_eq!(store.data_for_segment(seg).num_connected, 0);

        store.raise_permanences_to_threshold(seg, 2);

        assert!(store.data_for_segment(seg).num_connected >= 2);

        // The uniform bump preserves relative order
        let perms: Vec<Permanence> = store
            .synapses_for_segment(seg)
            .iter()
            .map(|&s| store.data_for_synapse(s).permanence)
            .collect();
        let mut sorted = perms.clone();
        sorted.sort_by(f32::total_cmp);
        assert!(sorted.windows(2).all(|w| w[1] - w[0] > 0.05));
    }

    #[test]
    fn test_raise_permanences_caps_at_pool_size() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.1).unwrap();
        store.create_synapse(seg, 51, 0.2).unwrap();

        // Asking for more than the pool connects everything
        store.raise_permanences_to_threshold(seg, 5);
        assert_eq!(store.data_for_segment(seg).num_connected, 2);
    }

    #[test]
    fn test_synapse_competition_connects_up() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        for (cell, perm) in [(50, 0.1f32), (51, 0.2), (52, 0.3), (53, 0.4)] {
            store.create_synapse(seg, cell, perm).unwrap();
        }
        assert_eq!(store.data_for_segment(seg).num_connected, 0);

        store.synapse_competition(seg, 2, 3);

        let connected = store.data_for_segment(seg).num_connected;
        assert!((2..=3).contains(&connected), "connected = {connected}");
    }

    #[test]
    fn test_synapse_competition_disconnects_down() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        for (cell, perm) in [(50, 0.6f32), (51, 0.7), (52, 0.8), (53, 0.9)] {
            store.create_synapse(seg, cell, perm).unwrap();
        }
        assert_eq!(store.data_for_segment(seg).num_connected, 4);

        store.synapse_competition(seg, 1, 2);

        let connected = store.data_for_segment(seg).num_connected;
        assert!((1..=2).contains(&connected), "connected = {connected}");
    }

    #[test]
    fn test_bump_segment() {
        let mut store = SynapseStore::with_cells(100);
        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.5).unwrap();
        store.create_synapse(seg, 51, 0.5).unwrap();

        store.bump_segment(seg, 0.1);

        for &syn in store.synapses_for_segment(seg) {
            assert!((store.data_for_synapse(syn).permanence - 0.6).abs() < 1e-6);
        }
    }

    #[test]
    fn test_destroy_min_permanence_synapses() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.9).unwrap();
        store.create_synapse(seg, 51, 0.1).unwrap();
        store.create_synapse(seg, 52, 0.2).unwrap();

        store.destroy_min_permanence_synapses(seg, 2, &[]);

        assert_eq!(store.num_synapses_on_segment(seg), 1);
        assert_eq!(store.presynaptic_cells_for_segment(seg), vec![50]);
    }

    #[test]
    fn test_destroy_min_permanence_respects_exclusion() {
        let mut store = store_with_threshold(100, 0.5);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.1).unwrap();
        store.create_synapse(seg, 51, 0.2).unwrap();

        store.destroy_min_permanence_synapses(seg, 1, &[50]);

        assert_eq!(store.presynaptic_cells_for_segment(seg), vec![50]);
    }

    #[test]
    fn test_grow_synapses() {
        let mut store = SynapseStore::with_cells(100);
        let mut rng = Random::new(42);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 50, 0.5).unwrap();

        store
            .grow_synapses(seg, &[50, 51, 52, 53], 0.21, &mut rng, Some(2), None)
            .unwrap();

        // 1 existing + 2 new; 50 never grows a duplicate
        assert_eq!(store.num_synapses_on_segment(seg), 3);
        let cells = store.presynaptic_cells_for_segment(seg);
        assert!(cells.contains(&50));
    }

    #[test]
    fn test_grow_synapses_respects_segment_cap() {
        let mut store = store_with_threshold(100, 0.5);
        let mut rng = Random::new(42);

        let seg = store.create_segment(10, None).unwrap();
        store.create_synapse(seg, 1, 0.05).unwrap();
        store.create_synapse(seg, 2, 0.06).unwrap();
        store.create_synapse(seg, 3, 0.9).unwrap();

        store
            .grow_synapses(seg, &[60, 61, 62], 0.21, &mut rng, None, Some(4))
            .unwrap();

        assert!(store.num_synapses_on_segment(seg) <= 4);
        // The strong synapse survives eviction
        assert!(store.presynaptic_cells_for_segment(seg).contains(&3));
    }

    #[test]
    fn test_synapses_for_presynaptic_cell() {
        let mut store = store_with_threshold(100, 0.5);

        let seg1 = store.create_segment(10, None).unwrap();
        let seg2 = store.create_segment(20, None).unwrap();
        let a = store.create_synapse(seg1, 50, 0.6).unwrap(); // connected
        let b = store.create_synapse(seg2, 50, 0.2).unwrap(); // potential

        let mut all = store.synapses_for_presynaptic_cell(50);
        all.sort_unstable();
        assert_eq!(all, vec![a.min(b), a.max(b)]);

        assert!(store.synapses_for_presynaptic_cell(99).is_empty());
    }

    #[test]
    fn test_compare_segments() {
        let mut store = SynapseStore::with_cells(100);
        let a = store.create_segment(5, None).unwrap();
        let b = store.create_segment(5, None).unwrap();
        let c = store.create_segment(9, None).unwrap();

        assert_eq!(store.compare_segments(a, b), std::cmp::Ordering::Less);
        assert_eq!(store.compare_segments(b, c), std::cmp::Ordering::Less);
        assert_eq!(store.compare_segments(c, a), std::cmp::Ordering::Greater);
        assert_eq!(store.compare_segments(a, a), std::cmp::Ordering::Equal);
    }

    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    struct EventLog {
        created_segments: Vec<Segment>,
        destroyed_segments: Vec<Segment>,
        created_synapses: Vec<Synapse>,
        destroyed_synapses: Vec<Synapse>,
        permanence_updates: usize,
    }

    struct Recorder(Rc<RefCell<EventLog>>);

    impl StoreEventHandler for Recorder {
        fn on_create_segment(&mut self, segment: Segment) {
            self.0.borrow_mut().created_segments.push(segment);
        }
        fn on_destroy_segment(&mut self, segment: Segment) {
            self.0.borrow_mut().destroyed_segments.push(segment);
        }
        fn on_create_synapse(&mut self, synapse: Synapse) {
            self.0.borrow_mut().created_synapses.push(synapse);
        }
        fn on_destroy_synapse(&mut self, synapse: Synapse) {
            self.0.borrow_mut().destroyed_synapses.push(synapse);
        }
        fn on_update_synapse_permanence(&mut self, _synapse: Synapse, _permanence: Permanence) {
            self.0.borrow_mut().permanence_updates += 1;
        }
    }

    #[test]
    fn test_event_subscription() {
        let mut store = store_with_threshold(100, 0.5);
        let log = Rc::new(RefCell::new(EventLog::default()));
        let token = store.subscribe(Box::new(Recorder(Rc::clone(&log))));

        let seg = store.create_segment(10, None).unwrap();
        let syn = store.create_synapse(seg, 50, 0.6).unwrap();
        store.update_synapse_permanence(syn, 0.7);
        store.destroy_segment(seg);

        {
            let log = log.borrow();
            assert_eq!(log.created_segments, vec![seg]);
            assert_eq!(log.created_synapses, vec![syn]);
            assert_eq!(log.destroyed_synapses, vec![syn]);
            assert_eq!(log.destroyed_segments, vec![seg]);
            // One update from creation, one explicit
            assert_eq!(log.permanence_updates, 2);
        }

        // After unsubscribing, nothing more is recorded
        let handler = store.unsubscribe(token);
        assert!(handler.is_some());
        assert!(store.unsubscribe(token).is_none());

        store.create_segment(11, None).unwrap();
        assert_eq!(log.borrow().created_segments.len(), 1);
    }

    #[test]
    fn test_eviction_notifies_destroy_before_create() {
        struct OrderProbe(Rc<RefCell<Vec<&'static str>>>);
        impl StoreEventHandler for OrderProbe {
            fn on_create_segment(&mut self, _segment: Segment) {
                self.0.borrow_mut().push("create");
            }
            fn on_destroy_segment(&mut self, _segment: Segment) {
                self.0.borrow_mut().push("destroy");
            }
        }

        let mut store = store_with_threshold(10, 0.5);
        let order = Rc::new(RefCell::new(Vec::new()));
        store.subscribe(Box::new(OrderProbe(Rc::clone(&order))));

        store.create_segment(3, Some(1)).unwrap();
        store.create_segment(3, Some(1)).unwrap();

        assert_eq!(*order.borrow(), vec!["create", "destroy", "create"]);
    }

    #[test]
    fn test_structural_equality() {
        let build = || {
            let mut store = store_with_threshold(50, 0.4);
            let seg = store.create_segment(3, None).unwrap();
            store.create_synapse(seg, 10, 0.6).unwrap();
            store.create_synapse(seg, 11, 0.2).unwrap();
            store.compute_activity(&[10], true);
            store
        };

        let a = build();
        let b = build();
        assert_eq!(a, b);

        let mut c = build();
        let seg = c.segments_for_cell(3)[0];
        c.bump_segment(seg, 0.01);
        assert_ne!(a, c);
    }

    #[test]
    fn test_clone_drops_subscribers() {
        let mut store = store_with_threshold(10, 0.5);
        let log = Rc::new(RefCell::new(EventLog::default()));
        store.subscribe(Box::new(Recorder(Rc::clone(&log))));

        let mut copy = store.clone();
        assert_eq!(store, copy);

        copy.create_segment(0, None).unwrap();
        assert!(log.borrow().created_segments.is_empty());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_roundtrip_structural_equality() {
        let mut store = SynapseStore::new(SynapseStoreParams {
            num_cells: 64,
            connected_threshold: 0.35,
            timeseries: true,
        })
        .unwrap();

        let seg1 = store.create_segment(3, None).unwrap();
        let seg2 = store.create_segment(17, None).unwrap();
        store.create_synapse(seg1, 1, 0.6).unwrap();
        store.create_synapse(seg1, 2, 0.1).unwrap();
        store.create_synapse(seg2, 1, 0.4).unwrap();

        let mut input = Sdr::new(&[64]);
        input.set_sparse(&[1, 2]).unwrap();
        store.compute_activity(&input.get_sparse(), true);
        store.adapt_segment(seg1, &input, 0.05, 0.02, false, 0);

        // Leave a destroyed slot in the free list
        let doomed = store.create_synapse(seg2, 9, 0.2).unwrap();
        store.destroy_synapse(doomed);

        let bytes = bincode::serialize(&store).unwrap();
        let restored: SynapseStore = bincode::deserialize(&bytes).unwrap();

        assert_eq!(store, restored);
        assert_eq!(restored.iteration(), store.iteration());
        assert_eq!(restored.num_synapses(), store.num_synapses());
    }
}
