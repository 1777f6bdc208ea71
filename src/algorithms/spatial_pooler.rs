//! Spatial Pooler implementation.
//!
//! The Spatial Pooler converts input activity into a fixed-sparsity pattern
//! of active columns. Each column is one cell with exactly one segment in the
//! underlying [`SynapseStore`]; computing consists of an overlap phase, a
//! boosting phase, an inhibition (competition) phase and, when learning is
//! enabled, permanence and duty-cycle updates that reshape what each column
//! responds to.

use crate::algorithms::{SynapseStore, SynapseStoreParams};
use crate::error::{Result, VelesError};
use crate::types::{
    CellIdx, ElemSparse, Permanence, Real, Sdr, SdrWeight, SynapseIdx, UInt, EPSILON,
    MAX_PERMANENCE, MIN_PERMANENCE,
};
use crate::utils::{Neighborhood, Random, Topology, WrappingMode};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Upper bound on the effective activation density.
const MAX_LOCAL_AREA_DENSITY: Real = 0.5;

/// Parameters for creating a Spatial Pooler.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialPoolerParams {
    /// Dimensions of the input space (e.g., `vec![100]` for 100 inputs).
    pub input_dimensions: Vec<UInt>,

    /// Dimensions of the column space (e.g., `vec![2048]` for 2048 columns).
    pub column_dimensions: Vec<UInt>,

    /// The extent of input each column can potentially connect to, as a
    /// receptive-field radius around the column's mapped input coordinate.
    /// Clamped to the input count.
    pub potential_radius: UInt,

    /// Fraction of inputs within the potential radius that a column gets
    /// potential synapses onto (0.0-1.0].
    pub potential_pct: Real,

    /// If true, all columns compete globally. If false, each column competes
    /// within its inhibition-radius neighborhood.
    pub global_inhibition: bool,

    /// Target density of active columns. Mutually exclusive with
    /// `num_active_columns_per_inh_area`; exactly one of the two may be
    /// nonzero.
    pub local_area_density: Real,

    /// Target number of active columns per inhibition area. Mutually
    /// exclusive with `local_area_density`.
    pub num_active_columns_per_inh_area: UInt,

    /// Minimum raw overlap for a column to win the competition.
    pub stimulus_threshold: UInt,

    /// Permanence decrement for synapses with inactive presynaptic inputs.
    pub syn_perm_inactive_dec: Permanence,

    /// Permanence increment for synapses with active presynaptic inputs.
    pub syn_perm_active_inc: Permanence,

    /// Permanence threshold for a synapse to be considered connected.
    pub syn_perm_connected: Permanence,

    /// Fraction of the neighborhood-maximum overlap duty cycle below which a
    /// column is considered weak and gets its permanences bumped.
    pub min_pct_overlap_duty_cycles: Real,

    /// Period (in iterations) of the duty-cycle moving averages.
    pub duty_cycle_period: UInt,

    /// Strength of boosting (0.0 disables boosting).
    pub boost_strength: Real,

    /// Random seed (negative for an entropy-drawn seed).
    pub seed: i64,

    /// Whether neighborhoods wrap around the grid edges.
    pub wrap_around: bool,
}

impl Default for SpatialPoolerParams {
    fn default() -> Self {
        Self {
            input_dimensions: vec![100],
            column_dimensions: vec![2048],
            potential_radius: 16,
            potential_pct: 0.5,
            global_inhibition: true,
            local_area_density: 0.05,
            num_active_columns_per_inh_area: 0,
            stimulus_threshold: 0,
            syn_perm_inactive_dec: 0.008,
            syn_perm_active_inc: 0.05,
            syn_perm_connected: 0.1,
            min_pct_overlap_duty_cycles: 0.001,
            duty_cycle_period: 1000,
            boost_strength: 0.0,
            seed: 1,
            wrap_around: true,
        }
    }
}

/// The Spatial Pooler algorithm.
///
/// Learns stable sparse representations of its input space by adjusting
/// synaptic permanences under competitive inhibition, with boosting and
/// duty-cycle bookkeeping to recover chronically under-active columns.
///
/// # Example
///
/// ```rust
/// use veles::algorithms::{SpatialPooler, SpatialPoolerParams};
/// use veles::types::Sdr;
///
/// let mut sp = SpatialPooler::new(SpatialPoolerParams {
///     input_dimensions: vec![100],
///     column_dimensions: vec![200],
///     potential_radius: 50,
///     ..Default::default()
/// }).unwrap();
///
/// let mut input = Sdr::new(&[100]);
/// let mut output = Sdr::new(&[200]);
///
/// input.set_sparse(&[1, 5, 10, 20, 30]).unwrap();
/// sp.compute(&input, true, &mut output).unwrap();
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialPooler {
    // Configuration
    input_dimensions: Vec<UInt>,
    column_dimensions: Vec<UInt>,
    num_inputs: usize,
    num_columns: usize,
    potential_radius: UInt,
    potential_pct: Real,
    global_inhibition: bool,
    local_area_density: Real,
    num_active_columns_per_inh_area: UInt,
    stimulus_threshold: UInt,
    inhibition_radius: UInt,
    duty_cycle_period: UInt,
    boost_strength: Real,
    wrap_around: bool,
    update_period: UInt,

    // Permanence parameters
    syn_perm_inactive_dec: Permanence,
    syn_perm_active_inc: Permanence,
    syn_perm_below_stimulus_inc: Permanence,
    syn_perm_connected: Permanence,
    min_pct_overlap_duty_cycles: Real,
    init_connected_pct: Real,

    // Per-column state
    boost_factors: Vec<Real>,
    overlap_duty_cycles: Vec<Real>,
    active_duty_cycles: Vec<Real>,
    min_overlap_duty_cycles: Vec<Real>,

    /// Scratch buffer holding the boosted overlaps of the last compute.
    boosted_overlaps: Vec<Real>,

    /// Synaptic graph; each column is one cell with exactly one segment whose
    /// id equals the column index.
    connections: SynapseStore,

    // Iteration counters
    iteration_num: UInt,
    iteration_learn_num: UInt,

    /// Cached neighbor lists for local inhibition, rebuilt when the
    /// inhibition radius changes.
    neighbor_map: Neighborhood,

    rng: Random,
}

impl SpatialPooler {
    /// Creates a new Spatial Pooler with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns an error for empty or zero dimensions, mismatched input/column
    /// rank, a violated density/count mutex, out-of-range percentages, or a
    /// density too small to ever activate a column.
    pub fn new(params: SpatialPoolerParams) -> Result<Self> {
        if params.input_dimensions.is_empty() {
            return Err(VelesError::InvalidParameter {
                name: "input_dimensions",
                message: "cannot be empty".to_string(),
            });
        }
        if params.column_dimensions.is_empty() {
            return Err(VelesError::InvalidParameter {
                name: "column_dimensions",
                message: "cannot be empty".to_string(),
            });
        }
        if params.input_dimensions.iter().any(|&d| d == 0) {
            return Err(VelesError::InvalidParameter {
                name: "input_dimensions",
                message: "dimensions must be positive integers".to_string(),
            });
        }
        if params.column_dimensions.iter().any(|&d| d == 0) {
            return Err(VelesError::InvalidParameter {
                name: "column_dimensions",
                message: "dimensions must be positive integers".to_string(),
            });
        }
        if params.input_dimensions.len() != params.column_dimensions.len() {
            return Err(VelesError::DimensionMismatch {
                expected: params.input_dimensions.clone(),
                actual: params.column_dimensions.clone(),
            });
        }
        if params.potential_pct <= 0.0 || params.potential_pct > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "potential_pct",
                message: "must be in range (0, 1]".to_string(),
            });
        }
        if params.boost_strength < 0.0 {
            return Err(VelesError::InvalidParameter {
                name: "boost_strength",
                message: "must be non-negative".to_string(),
            });
        }
        if params.duty_cycle_period == 0 {
            return Err(VelesError::InvalidParameter {
                name: "duty_cycle_period",
                message: "must be at least 1".to_string(),
            });
        }
        if params.min_pct_overlap_duty_cycles <= 0.0 || params.min_pct_overlap_duty_cycles > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "min_pct_overlap_duty_cycles",
                message: "must be in range (0, 1]".to_string(),
            });
        }

        let num_inputs = Topology::num_elements(&params.input_dimensions);
        let num_columns = Topology::num_elements(&params.column_dimensions);

        // Exactly one way of expressing the target sparsity may be set.
        let count_set = params.num_active_columns_per_inh_area > 0;
        let density_set = params.local_area_density > 0.0;
        if count_set == density_set {
            return Err(VelesError::InvalidParameter {
                name: "local_area_density",
                message: "exactly one of local_area_density and \
                          num_active_columns_per_inh_area must be set"
                    .to_string(),
            });
        }
        if count_set && params.num_active_columns_per_inh_area as usize > num_columns {
            return Err(VelesError::InvalidParameter {
                name: "num_active_columns_per_inh_area",
                message: format!("exceeds the column count {num_columns}"),
            });
        }
        if density_set {
            Self::validate_density(params.local_area_density, num_columns)?;
        }

        let mut sp = Self {
            input_dimensions: params.input_dimensions.clone(),
            column_dimensions: params.column_dimensions.clone(),
            num_inputs,
            num_columns,
            potential_radius: params.potential_radius.min(num_inputs as UInt),
            potential_pct: params.potential_pct,
            global_inhibition: params.global_inhibition,
            local_area_density: params.local_area_density,
            num_active_columns_per_inh_area: params.num_active_columns_per_inh_area,
            stimulus_threshold: params.stimulus_threshold,
            inhibition_radius: 0,
            duty_cycle_period: params.duty_cycle_period,
            boost_strength: params.boost_strength,
            wrap_around: params.wrap_around,
            update_period: 50,

            syn_perm_inactive_dec: params.syn_perm_inactive_dec,
            syn_perm_active_inc: params.syn_perm_active_inc,
            syn_perm_below_stimulus_inc: params.syn_perm_connected / 10.0,
            syn_perm_connected: params.syn_perm_connected,
            min_pct_overlap_duty_cycles: params.min_pct_overlap_duty_cycles,
            init_connected_pct: 0.5,

            boost_factors: vec![1.0; num_columns],
            overlap_duty_cycles: vec![0.0; num_columns],
            active_duty_cycles: vec![0.0; num_columns],
            min_overlap_duty_cycles: vec![0.0; num_columns],
            boosted_overlaps: vec![0.0; num_columns],

            connections: SynapseStore::new(SynapseStoreParams {
                num_cells: num_columns as CellIdx,
                connected_threshold: params.syn_perm_connected,
                timeseries: false,
            })?,

            iteration_num: 0,
            iteration_learn_num: 0,

            neighbor_map: Neighborhood::new(),
            rng: Random::new(params.seed),
        };

        sp.initialize_columns()?;
        sp.update_inhibition_radius();

        Ok(sp)
    }

    fn validate_density(density: Real, num_columns: usize) -> Result<()> {
        if density <= 0.0 || density > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "local_area_density",
                message: "must be in range (0, 1]".to_string(),
            });
        }
        if (density * num_columns as Real) as usize == 0 {
            return Err(VelesError::InvalidParameter {
                name: "local_area_density",
                message: format!(
                    "density {density} over {num_columns} columns would never \
                     activate any column"
                ),
            });
        }
        Ok(())
    }

    /// Seeds every column with a spatially localized potential pool and an
    /// initial permanence distribution, then raises each column to the
    /// stimulus threshold so it starts able to activate.
    fn initialize_columns(&mut self) -> Result<()> {
        for column in 0..self.num_columns {
            let segment = self.connections.create_segment(column as CellIdx, Some(1))?;
            debug_assert_eq!(segment as usize, column);

            let pool = self.init_map_potential(column);
            for &input in &pool {
                let permanence =
                    if self.rng.get_real64() <= f64::from(self.init_connected_pct) {
                        self.init_perm_connected()
                    } else {
                        self.init_perm_non_connected()
                    };
                self.connections
                    .create_synapse(segment, input as CellIdx, permanence)?;
            }

            self.connections
                .raise_permanences_to_threshold(segment, self.stimulus_threshold);
        }

        Ok(())
    }

    /// Draws a column's potential pool: the neighborhood of its proportionally
    /// mapped input coordinate, subsampled by `potential_pct`. Sorted.
    fn init_map_potential(&mut self, column: usize) -> Vec<UInt> {
        let center = Topology::map_column_to_input(
            column,
            &self.column_dimensions,
            &self.input_dimensions,
        );

        let neighborhood = Topology::neighborhood(
            center,
            &self.input_dimensions,
            self.potential_radius,
            self.wrapping_mode(),
            true,
        );

        let num_potential = ((neighborhood.len() as Real) * self.potential_pct).round() as usize;
        let mut sampled = self.rng.sample(neighborhood, num_potential);
        sampled.sort_unstable();
        sampled.into_iter().map(|i| i as UInt).collect()
    }

    /// Returns a random permanence above the connected threshold.
    fn init_perm_connected(&mut self) -> Permanence {
        self.rng.real_range(self.syn_perm_connected, MAX_PERMANENCE)
    }

    /// Returns a random permanence below the connected threshold.
    fn init_perm_non_connected(&mut self) -> Permanence {
        self.rng.real_range(MIN_PERMANENCE, self.syn_perm_connected)
    }

    fn wrapping_mode(&self) -> WrappingMode {
        if self.wrap_around {
            WrappingMode::Wrap
        } else {
            WrappingMode::NoWrap
        }
    }

    /// The main compute method.
    ///
    /// Takes an input SDR and produces an output SDR of active columns (with
    /// per-winner weights set from the boosted overlaps). If learning is
    /// enabled, also adapts permanences, duty cycles and boost factors.
    ///
    /// Returns the raw per-column overlaps.
    ///
    /// # Errors
    ///
    /// Returns an error if the input or output container size does not match
    /// the configured topology, or if the effective density yields zero
    /// winners.
    pub fn compute(
        &mut self,
        input: &Sdr,
        learn: bool,
        output: &mut Sdr,
    ) -> Result<Vec<SynapseIdx>> {
        if input.size() != self.num_inputs {
            return Err(VelesError::DimensionMismatch {
                expected: self.input_dimensions.clone(),
                actual: input.dimensions().to_vec(),
            });
        }
        output.reshape(&self.column_dimensions)?;

        self.iteration_num += 1;
        if learn {
            self.iteration_learn_num += 1;
        }

        // Weighted connected overlap per column; segment ids equal column
        // indices (one segment per column, created in order).
        let active_inputs = input.get_sparse();
        let input_weights = input.get_sparse_weights();
        let overlaps =
            self.connections
                .compute_activity_weighted(&active_inputs, &input_weights, learn);

        self.boost_overlaps(&overlaps);

        let mut active_columns = self.inhibit_columns(&self.boosted_overlaps, &overlaps)?;
        active_columns.sort_unstable();

        let output_weights: Vec<SdrWeight> = active_columns
            .iter()
            .map(|&c| self.boosted_overlaps[c as usize] as SdrWeight)
            .collect();
        output.set_sparse_owned(active_columns)?;
        output.set_sparse_weights(output_weights)?;

        if learn {
            self.adapt_synapses(input, output);
            self.update_duty_cycles(&overlaps, output);
            self.bump_up_weak_columns();
            self.update_boost_factors();

            if self.is_update_round() {
                self.update_inhibition_radius();
                self.update_min_duty_cycles();
            }
        }

        Ok(overlaps)
    }

    /// Multiplies raw overlaps by the per-column boost factors. With boosting
    /// effectively disabled the raw values pass through unchanged.
    fn boost_overlaps(&mut self, overlaps: &[SynapseIdx]) {
        self.boosted_overlaps.clear();
        if self.boost_strength < EPSILON {
            self.boosted_overlaps
                .extend(overlaps.iter().map(|&o| Real::from(o)));
            return;
        }
        self.boosted_overlaps.extend(
            overlaps
                .iter()
                .zip(&self.boost_factors)
                .map(|(&o, &b)| Real::from(o) * b),
        );
    }

    // ========================================================================
    // Inhibition
    // ========================================================================

    /// Effective target density for the current call.
    fn current_density(&self) -> Real {
        if self.num_active_columns_per_inh_area > 0 {
            let area = self.inhibition_area();
            (self.num_active_columns_per_inh_area as Real / area as Real)
                .min(MAX_LOCAL_AREA_DENSITY)
        } else {
            self.local_area_density
        }
    }

    /// Number of columns within one inhibition hypercube, clipped by the
    /// grid bounds.
    fn inhibition_area(&self) -> usize {
        let diameter = 2 * self.inhibition_radius as usize + 1;
        self.column_dimensions
            .iter()
            .map(|&d| (d as usize).min(diameter))
            .product::<usize>()
            .max(1)
    }

    fn inhibit_columns(&self, boosted: &[Real], raw: &[SynapseIdx]) -> Result<Vec<CellIdx>> {
        let density = self.current_density();

        let max_dim = self.column_dimensions.iter().copied().max().unwrap_or(1);
        if self.global_inhibition || self.inhibition_radius >= max_dim {
            self.inhibit_columns_global(boosted, raw, density)
        } else {
            Ok(self.inhibit_columns_local(boosted, raw, density))
        }
    }

    /// Global inhibition: the top K columns over the whole region win, with
    /// ties broken toward the higher column id.
    fn inhibit_columns_global(
        &self,
        boosted: &[Real],
        raw: &[SynapseIdx],
        density: Real,
    ) -> Result<Vec<CellIdx>> {
        let num_desired = (density * self.num_columns as Real).round() as usize;
        if num_desired == 0 {
            return Err(VelesError::InvalidParameter {
                name: "local_area_density",
                message: format!(
                    "density {density} over {} columns yields zero active columns",
                    self.num_columns
                ),
            });
        }
        let num_desired = num_desired.min(self.num_columns);

        let mut columns: Vec<CellIdx> = (0..self.num_columns as CellIdx).collect();

        // Descending overlap; on equal overlaps the higher id wins, so the
        // ordering is total and reproducible.
        let compare = |a: &CellIdx, b: &CellIdx| {
            boosted[*b as usize]
                .total_cmp(&boosted[*a as usize])
                .then_with(|| b.cmp(a))
        };

        // Partition around the K-th column first; only the winners need the
        // full sort.
        columns.select_nth_unstable_by(num_desired - 1, compare);
        columns.truncate(num_desired);
        columns.sort_unstable_by(compare);

        // Sub-threshold columns are trimmed even if they won the sort; the
        // check is against the raw overlap, not the boosted one.
        columns.retain(|&c| UInt::from(raw[c as usize]) >= self.stimulus_threshold);

        Ok(columns)
    }

    /// Local inhibition: a column wins if fewer neighbors beat it than the
    /// neighborhood's desired winner count. A neighbor beats the column on a
    /// strictly greater overlap, or on an equal overlap when the neighbor has
    /// already been selected as a winner this round.
    fn inhibit_columns_local(
        &self,
        boosted: &[Real],
        raw: &[SynapseIdx],
        density: Real,
    ) -> Vec<CellIdx> {
        let mut active = Vec::with_capacity((density * self.num_columns as Real) as usize + 1);
        let mut already_winner = vec![false; self.num_columns];

        for column in 0..self.num_columns {
            if UInt::from(raw[column]) < self.stimulus_threshold {
                continue;
            }

            let Some(hood) = self.neighbor_map.get(column) else {
                continue;
            };

            let num_desired_local = (0.5 + density * (hood.len() + 1) as Real) as usize;
            debug_assert!(num_desired_local > 0);

            let mut beaten_by = 0usize;
            for &neighbor in hood {
                debug_assert_ne!(neighbor, column);
                let neighbor_overlap = boosted[neighbor];
                let column_overlap = boosted[column];

                if neighbor_overlap > column_overlap
                    || (neighbor_overlap == column_overlap && already_winner[neighbor])
                {
                    beaten_by += 1;
                    if beaten_by >= num_desired_local {
                        break;
                    }
                }
            }

            if beaten_by < num_desired_local {
                active.push(column as CellIdx);
                already_winner[column] = true;
            }
        }

        active
    }

    // ========================================================================
    // Learning
    // ========================================================================

    /// Adjusts each winner's permanences toward the current input and re-
    /// raises it to the stimulus threshold.
    fn adapt_synapses(&mut self, input: &Sdr, active: &Sdr) {
        for &column in &active.get_sparse() {
            let segment = self.connections.get_segment(column, 0);
            self.connections.adapt_segment(
                segment,
                input,
                self.syn_perm_active_inc,
                self.syn_perm_inactive_dec,
                false,
                0,
            );
            self.connections
                .raise_permanences_to_threshold(segment, self.stimulus_threshold);
        }
    }

    /// Updates the overlap and active duty cycles (exponential moving
    /// averages over `min(duty_cycle_period, iteration)` iterations).
    fn update_duty_cycles(&mut self, overlaps: &[SynapseIdx], active: &Sdr) {
        let overlap_indices: Vec<ElemSparse> = overlaps
            .iter()
            .enumerate()
            .filter(|(_, &o)| o != 0)
            .map(|(i, _)| i as ElemSparse)
            .collect();

        let period = self.duty_cycle_period.min(self.iteration_num).max(1);

        Self::update_duty_cycles_helper(&mut self.overlap_duty_cycles, &overlap_indices, period);
        Self::update_duty_cycles_helper(&mut self.active_duty_cycles, &active.get_sparse(), period);
    }

    /// One EMA step: decay everything by (period-1)/period, then add 1/period
    /// at the indices that were active this iteration.
    fn update_duty_cycles_helper(
        duty_cycles: &mut [Real],
        new_values: &[ElemSparse],
        period: UInt,
    ) {
        debug_assert!(period >= 1);
        let period = period as Real;

        let decay = (period - 1.0) / period;
        for duty_cycle in duty_cycles.iter_mut() {
            *duty_cycle *= decay;
        }

        let increment = 1.0 / period;
        for &idx in new_values {
            duty_cycles[idx as usize] += increment;
        }
    }

    /// Uniformly raises the permanences of columns whose overlap duty cycle
    /// fell below their neighborhood minimum, helping them recover.
    fn bump_up_weak_columns(&mut self) {
        for column in 0..self.num_columns {
            if self.overlap_duty_cycles[column] >= self.min_overlap_duty_cycles[column] {
                continue;
            }
            let segment = self.connections.get_segment(column as CellIdx, 0);
            self.connections
                .bump_segment(segment, self.syn_perm_below_stimulus_inc);
        }
    }

    /// Recomputes boost factors as `exp((target - actual) * boost_strength)`,
    /// with the actual density taken globally or from each column's
    /// neighborhood depending on the inhibition mode.
    fn update_boost_factors(&mut self) {
        if self.boost_strength < EPSILON {
            return;
        }
        if self.global_inhibition {
            self.update_boost_factors_global();
        } else {
            self.update_boost_factors_local();
        }
    }

    fn update_boost_factors_global(&mut self) {
        let target_density = self.current_density();
        for i in 0..self.num_columns {
            self.boost_factors[i] =
                ((target_density - self.active_duty_cycles[i]) * self.boost_strength).exp();
        }
    }

    fn update_boost_factors_local(&mut self) {
        for i in 0..self.num_columns {
            let Some(hood) = self.neighbor_map.get(i) else {
                continue;
            };

            // The cached neighborhood excludes the center; add it back in.
            let mut local_density = self.active_duty_cycles[i];
            for &neighbor in hood {
                local_density += self.active_duty_cycles[neighbor];
            }
            let target_density = local_density / (hood.len() + 1) as Real;

            self.boost_factors[i] =
                ((target_density - self.active_duty_cycles[i]) * self.boost_strength).exp();
        }
    }

    /// Recomputes the inhibition radius from the average connected-synapse
    /// span scaled by the columns-per-input ratio.
    fn update_inhibition_radius(&mut self) {
        if self.global_inhibition {
            let max_dim = self.column_dimensions.iter().copied().max().unwrap_or(1);
            self.apply_inhibition_radius(max_dim);
            return;
        }

        let mut connected_span = 0.0;
        for column in 0..self.num_columns {
            connected_span += self.avg_connected_span_for_column(column as CellIdx);
        }
        connected_span /= self.num_columns as Real;

        let columns_per_input = self.avg_columns_per_input();
        let diameter = connected_span * columns_per_input;
        let radius = ((diameter - 1.0) / 2.0).max(1.0);

        self.apply_inhibition_radius(radius.round() as UInt);
    }

    fn apply_inhibition_radius(&mut self, radius: UInt) {
        debug_assert!(radius > 0);
        if self.inhibition_radius == radius {
            return;
        }
        self.inhibition_radius = radius;
        if !self.global_inhibition {
            self.neighbor_map = Neighborhood::compute_all(
                &self.column_dimensions,
                radius,
                self.wrapping_mode(),
                true,
            );
        }
    }

    /// Mean of the per-dimension column/input size ratios.
    fn avg_columns_per_input(&self) -> Real {
        let num_dims = self.column_dimensions.len().max(self.input_dimensions.len());
        let mut columns_per_input = 0.0;
        for i in 0..num_dims {
            let col = self.column_dimensions.get(i).copied().unwrap_or(1) as Real;
            let input = self.input_dimensions.get(i).copied().unwrap_or(1) as Real;
            columns_per_input += col / input;
        }
        columns_per_input / num_dims as Real
    }

    /// Average per-dimension extent of a column's connected synapses in the
    /// input space.
    fn avg_connected_span_for_column(&self, column: CellIdx) -> Real {
        let segment = self.connections.get_segment(column, 0);
        let num_dims = self.input_dimensions.len();

        let mut max_coord = vec![0 as UInt; num_dims];
        let mut min_coord = vec![UInt::MAX; num_dims];
        let mut any_connected = false;

        for &synapse in self.connections.synapses_for_segment(segment) {
            let data = self.connections.data_for_synapse(synapse);
            if data.permanence < self.connections.connected_threshold() {
                continue;
            }
            any_connected = true;

            let coords = Topology::index_to_coordinates(
                data.presynaptic_cell as usize,
                &self.input_dimensions,
            );
            for (dim, &coord) in coords.iter().enumerate() {
                max_coord[dim] = max_coord[dim].max(coord);
                min_coord[dim] = min_coord[dim].min(coord);
            }
        }

        if !any_connected {
            return 0.0;
        }

        let mut total_span = 0;
        for dim in 0..num_dims {
            total_span += max_coord[dim] - min_coord[dim] + 1;
        }

        total_span as Real / num_dims as Real
    }

    /// Refreshes each column's minimum overlap duty cycle from the global or
    /// neighborhood maximum.
    fn update_min_duty_cycles(&mut self) {
        let max_dim = self.column_dimensions.iter().copied().max().unwrap_or(1);
        if self.global_inhibition || self.inhibition_radius >= max_dim {
            self.update_min_duty_cycles_global();
        } else {
            self.update_min_duty_cycles_local();
        }
    }

    fn update_min_duty_cycles_global(&mut self) {
        let max_overlap_duty = self
            .overlap_duty_cycles
            .iter()
            .copied()
            .fold(0.0_f32, Real::max);
        let min_duty = self.min_pct_overlap_duty_cycles * max_overlap_duty;
        self.min_overlap_duty_cycles.fill(min_duty);
    }

    fn update_min_duty_cycles_local(&mut self) {
        for i in 0..self.num_columns {
            // The neighborhood maximum includes the column itself.
            let mut max_overlap_duty = self.overlap_duty_cycles[i];
            if let Some(hood) = self.neighbor_map.get(i) {
                for &neighbor in hood {
                    max_overlap_duty = max_overlap_duty.max(self.overlap_duty_cycles[neighbor]);
                }
            }
            self.min_overlap_duty_cycles[i] = max_overlap_duty * self.min_pct_overlap_duty_cycles;
        }
    }

    fn is_update_round(&self) -> bool {
        self.iteration_num % self.update_period == 0
    }

    // ========================================================================
    // Getters and setters
    // ========================================================================

    /// Returns the input dimensions.
    pub fn input_dimensions(&self) -> &[UInt] {
        &self.input_dimensions
    }

    /// Returns the column dimensions.
    pub fn column_dimensions(&self) -> &[UInt] {
        &self.column_dimensions
    }

    /// Returns the number of inputs.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Returns the potential radius.
    pub fn potential_radius(&self) -> UInt {
        self.potential_radius
    }

    /// Sets the potential radius.
    ///
    /// # Errors
    ///
    /// Returns an error if the radius is not below the input count.
    pub fn set_potential_radius(&mut self, potential_radius: UInt) -> Result<()> {
        if potential_radius as usize >= self.num_inputs {
            return Err(VelesError::InvalidParameter {
                name: "potential_radius",
                message: format!("must be below the input count {}", self.num_inputs),
            });
        }
        self.potential_radius = potential_radius;
        Ok(())
    }

    /// Returns the potential percent.
    pub fn potential_pct(&self) -> Real {
        self.potential_pct
    }

    /// Sets the potential percent.
    ///
    /// # Errors
    ///
    /// Returns an error if the value lies outside (0, 1].
    pub fn set_potential_pct(&mut self, potential_pct: Real) -> Result<()> {
        if potential_pct <= 0.0 || potential_pct > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "potential_pct",
                message: "must be in range (0, 1]".to_string(),
            });
        }
        self.potential_pct = potential_pct;
        Ok(())
    }

    /// Returns whether global inhibition is enabled.
    pub fn global_inhibition(&self) -> bool {
        self.global_inhibition
    }

    /// Switches between global and local inhibition. Switching to local
    /// rebuilds the cached neighborhoods if needed.
    pub fn set_global_inhibition(&mut self, global_inhibition: bool) {
        self.global_inhibition = global_inhibition;
        if !global_inhibition && self.neighbor_map.is_empty() && self.inhibition_radius > 0 {
            self.neighbor_map = Neighborhood::compute_all(
                &self.column_dimensions,
                self.inhibition_radius,
                self.wrapping_mode(),
                true,
            );
        }
    }

    /// Returns the target active-column count per inhibition area (0 when the
    /// density is configured instead).
    pub fn num_active_columns_per_inh_area(&self) -> UInt {
        self.num_active_columns_per_inh_area
    }

    /// Sets the target active-column count, clearing the density (the two are
    /// mutually exclusive).
    ///
    /// # Errors
    ///
    /// Returns an error if the count is zero or exceeds the column count.
    pub fn set_num_active_columns_per_inh_area(&mut self, count: UInt) -> Result<()> {
        if count == 0 || count as usize > self.num_columns {
            return Err(VelesError::InvalidParameter {
                name: "num_active_columns_per_inh_area",
                message: format!("must be in range [1, {}]", self.num_columns),
            });
        }
        self.num_active_columns_per_inh_area = count;
        self.local_area_density = 0.0;
        Ok(())
    }

    /// Returns the target density (0 when the count is configured instead).
    pub fn local_area_density(&self) -> Real {
        self.local_area_density
    }

    /// Sets the target density, clearing the active-column count (the two are
    /// mutually exclusive).
    ///
    /// # Errors
    ///
    /// Returns an error if the density lies outside (0, 1] or implies zero
    /// active columns.
    pub fn set_local_area_density(&mut self, density: Real) -> Result<()> {
        Self::validate_density(density, self.num_columns)?;
        self.local_area_density = density;
        self.num_active_columns_per_inh_area = 0;
        Ok(())
    }

    /// Returns the stimulus threshold.
    pub fn stimulus_threshold(&self) -> UInt {
        self.stimulus_threshold
    }

    /// Sets the stimulus threshold.
    pub fn set_stimulus_threshold(&mut self, stimulus_threshold: UInt) {
        self.stimulus_threshold = stimulus_threshold;
    }

    /// Returns the inhibition radius.
    pub fn inhibition_radius(&self) -> UInt {
        self.inhibition_radius
    }

    /// Sets the inhibition radius, rebuilding the cached neighborhoods for
    /// local inhibition.
    ///
    /// # Errors
    ///
    /// Returns an error if the radius is zero.
    pub fn set_inhibition_radius(&mut self, inhibition_radius: UInt) -> Result<()> {
        if inhibition_radius == 0 {
            return Err(VelesError::InvalidParameter {
                name: "inhibition_radius",
                message: "must be at least 1".to_string(),
            });
        }
        self.apply_inhibition_radius(inhibition_radius);
        Ok(())
    }

    /// Returns the duty cycle period.
    pub fn duty_cycle_period(&self) -> UInt {
        self.duty_cycle_period
    }

    /// Sets the duty cycle period.
    pub fn set_duty_cycle_period(&mut self, duty_cycle_period: UInt) {
        self.duty_cycle_period = duty_cycle_period;
    }

    /// Returns the boost strength.
    pub fn boost_strength(&self) -> Real {
        self.boost_strength
    }

    /// Sets the boost strength.
    ///
    /// # Errors
    ///
    /// Returns an error if the strength is negative.
    pub fn set_boost_strength(&mut self, boost_strength: Real) -> Result<()> {
        if boost_strength < 0.0 {
            return Err(VelesError::InvalidParameter {
                name: "boost_strength",
                message: "must be non-negative".to_string(),
            });
        }
        self.boost_strength = boost_strength;
        Ok(())
    }

    /// Returns the current iteration number.
    pub fn iteration_num(&self) -> UInt {
        self.iteration_num
    }

    /// Returns the current learning iteration number.
    pub fn iteration_learn_num(&self) -> UInt {
        self.iteration_learn_num
    }

    /// Returns whether neighborhoods wrap at the grid edges.
    pub fn wrap_around(&self) -> bool {
        self.wrap_around
    }

    /// Returns the update period for the inhibition radius and minimum
    /// duty-cycle refresh.
    pub fn update_period(&self) -> UInt {
        self.update_period
    }

    /// Sets the update period.
    pub fn set_update_period(&mut self, update_period: UInt) {
        self.update_period = update_period;
    }

    /// Returns the synapse permanence connected threshold.
    pub fn syn_perm_connected(&self) -> Permanence {
        self.syn_perm_connected
    }

    /// Returns the active-synapse permanence increment.
    pub fn syn_perm_active_inc(&self) -> Permanence {
        self.syn_perm_active_inc
    }

    /// Returns the inactive-synapse permanence decrement.
    pub fn syn_perm_inactive_dec(&self) -> Permanence {
        self.syn_perm_inactive_dec
    }

    /// Returns the weak-column recovery increment.
    pub fn syn_perm_below_stimulus_inc(&self) -> Permanence {
        self.syn_perm_below_stimulus_inc
    }

    /// Returns the minimum-percent overlap duty cycle fraction.
    pub fn min_pct_overlap_duty_cycles(&self) -> Real {
        self.min_pct_overlap_duty_cycles
    }

    /// Returns the per-column boost factors.
    pub fn boost_factors(&self) -> &[Real] {
        &self.boost_factors
    }

    /// Overwrites the per-column boost factors.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length differs from the column count.
    pub fn set_boost_factors(&mut self, boost_factors: &[Real]) -> Result<()> {
        if boost_factors.len() != self.num_columns {
            return Err(VelesError::DimensionMismatch {
                expected: vec![self.num_columns as u32],
                actual: vec![boost_factors.len() as u32],
            });
        }
        self.boost_factors.copy_from_slice(boost_factors);
        Ok(())
    }

    /// Returns the per-column overlap duty cycles.
    pub fn overlap_duty_cycles(&self) -> &[Real] {
        &self.overlap_duty_cycles
    }

    /// Returns the per-column active duty cycles.
    pub fn active_duty_cycles(&self) -> &[Real] {
        &self.active_duty_cycles
    }

    /// Returns the per-column minimum overlap duty cycles.
    pub fn min_overlap_duty_cycles(&self) -> &[Real] {
        &self.min_overlap_duty_cycles
    }

    /// Returns the boosted overlaps from the last compute.
    pub fn boosted_overlaps(&self) -> &[Real] {
        &self.boosted_overlaps
    }

    /// Returns a reference to the underlying synaptic graph.
    pub fn connections(&self) -> &SynapseStore {
        &self.connections
    }

    /// Returns the connected-synapse count per column.
    pub fn connected_counts(&self) -> Vec<UInt> {
        (0..self.num_columns)
            .map(|column| {
                let segment = self.connections.get_segment(column as CellIdx, 0);
                UInt::from(self.connections.data_for_segment(segment).num_connected)
            })
            .collect()
    }

    /// Returns a column's permanences as a dense input-sized vector. Entries
    /// below `threshold` are left at zero; pass 0.0 to get all of them.
    pub fn get_permanence(&self, column: CellIdx, threshold: Permanence) -> Vec<Real> {
        let segment = self.connections.get_segment(column, 0);
        let mut permanences = vec![0.0; self.num_inputs];
        for &synapse in self.connections.synapses_for_segment(segment) {
            let data = self.connections.data_for_synapse(synapse);
            if data.permanence >= threshold {
                permanences[data.presynaptic_cell as usize] = data.permanence;
            }
        }
        permanences
    }

    /// Overwrites a column's permanences from a dense input-sized vector.
    /// Only inputs inside the column's potential pool are touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length differs from the input count.
    pub fn set_permanence(&mut self, column: CellIdx, permanences: &[Real]) -> Result<()> {
        if permanences.len() != self.num_inputs {
            return Err(VelesError::DimensionMismatch {
                expected: vec![self.num_inputs as u32],
                actual: vec![permanences.len() as u32],
            });
        }

        let segment = self.connections.get_segment(column, 0);
        let synapses: Vec<_> = self
            .connections
            .synapses_for_segment(segment)
            .iter()
            .copied()
            .collect();
        for synapse in synapses {
            let presynaptic_cell = self.connections.data_for_synapse(synapse).presynaptic_cell;
            self.connections
                .update_synapse_permanence(synapse, permanences[presynaptic_cell as usize]);
        }
        Ok(())
    }

    /// Returns a column's potential pool as a dense 0/1 vector over the
    /// input space.
    pub fn get_potential(&self, column: CellIdx) -> Vec<UInt> {
        let segment = self.connections.get_segment(column, 0);
        let mut potential = vec![0; self.num_inputs];
        for &synapse in self.connections.synapses_for_segment(segment) {
            let data = self.connections.data_for_synapse(synapse);
            potential[data.presynaptic_cell as usize] = 1;
        }
        potential
    }

    /// Replaces a column's potential pool. Existing synapses are destroyed
    /// and new ones are created with freshly drawn permanences.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length differs from the input count or
    /// the synapse id space is exhausted.
    pub fn set_potential(&mut self, column: CellIdx, potential: &[UInt]) -> Result<()> {
        if potential.len() != self.num_inputs {
            return Err(VelesError::DimensionMismatch {
                expected: vec![self.num_inputs as u32],
                actual: vec![potential.len() as u32],
            });
        }

        let segment = self.connections.get_segment(column, 0);
        while let Some(&synapse) = self.connections.synapses_for_segment(segment).first() {
            self.connections.destroy_synapse(synapse);
        }

        for (input, &flag) in potential.iter().enumerate() {
            if flag == 0 {
                continue;
            }
            let permanence = if self.rng.get_real64() <= f64::from(self.init_connected_pct) {
                self.init_perm_connected()
            } else {
                self.init_perm_non_connected()
            };
            self.connections
                .create_synapse(segment, input as CellIdx, permanence)?;
        }
        Ok(())
    }
}

impl PartialEq for SpatialPooler {
    fn eq(&self, other: &Self) -> bool {
        // The cached neighbor map and the boosted-overlap scratch buffer are
        // derived state and excluded.
        self.input_dimensions == other.input_dimensions
            && self.column_dimensions == other.column_dimensions
            && self.num_inputs == other.num_inputs
            && self.num_columns == other.num_columns
            && self.potential_radius == other.potential_radius
            && self.potential_pct == other.potential_pct
            && self.init_connected_pct == other.init_connected_pct
            && self.global_inhibition == other.global_inhibition
            && self.local_area_density == other.local_area_density
            && self.num_active_columns_per_inh_area == other.num_active_columns_per_inh_area
            && self.stimulus_threshold == other.stimulus_threshold
            && self.inhibition_radius == other.inhibition_radius
            && self.duty_cycle_period == other.duty_cycle_period
            && self.boost_strength == other.boost_strength
            && self.wrap_around == other.wrap_around
            && self.update_period == other.update_period
            && self.syn_perm_inactive_dec == other.syn_perm_inactive_dec
            && self.syn_perm_active_inc == other.syn_perm_active_inc
            && self.syn_perm_below_stimulus_inc == other.syn_perm_below_stimulus_inc
            && self.syn_perm_connected == other.syn_perm_connected
            && self.min_pct_overlap_duty_cycles == other.min_pct_overlap_duty_cycles
            && self.boost_factors == other.boost_factors
            && self.overlap_duty_cycles == other.overlap_duty_cycles
            && self.active_duty_cycles == other.active_duty_cycles
            && self.min_overlap_duty_cycles == other.min_overlap_duty_cycles
            && self.iteration_num == other.iteration_num
            && self.iteration_learn_num == other.iteration_learn_num
            && self.connections == other.connections
            && self.rng == other.rng
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_spatial_pooler() {
        let sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![200],
            ..Default::default()
        })
        .unwrap();

        assert_eq!(sp.num_inputs(), 100);
        assert_eq!(sp.num_columns(), 200);
        assert_eq!(sp.connections().num_segments(), 200);
    }

    #[test]
    fn test_invalid_params() {
        // Empty dimensions
        assert!(SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![],
            column_dimensions: vec![100],
            ..Default::default()
        })
        .is_err());

        // Mismatched rank
        assert!(SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![10, 10],
            column_dimensions: vec![100],
            ..Default::default()
        })
        .is_err());

        // Out-of-range potential percent
        assert!(SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![100],
            potential_pct: 1.5,
            ..Default::default()
        })
        .is_err());

        // Both sparsity controls set
        assert!(SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![100],
            local_area_density: 0.05,
            num_active_columns_per_inh_area: 10,
            ..Default::default()
        })
        .is_err());

        // Neither sparsity control set
        assert!(SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![100],
            local_area_density: 0.0,
            num_active_columns_per_inh_area: 0,
            ..Default::default()
        })
        .is_err());

        // Density that can never activate a column
        assert!(SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![10],
            local_area_density: 0.001,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_mutex_setters() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![200],
            ..Default::default()
        })
        .unwrap();

        sp.set_num_active_columns_per_inh_area(10).unwrap();
        assert_eq!(sp.num_active_columns_per_inh_area(), 10);
        assert_eq!(sp.local_area_density(), 0.0);

        sp.set_local_area_density(0.05).unwrap();
        assert_eq!(sp.num_active_columns_per_inh_area(), 0);
        assert!((sp.local_area_density() - 0.05).abs() < 1e-6);

        assert!(sp.set_local_area_density(1.5).is_err());
        assert!(sp.set_num_active_columns_per_inh_area(0).is_err());
        assert!(sp.set_num_active_columns_per_inh_area(201).is_err());
    }

    #[test]
    fn test_initial_columns_reach_stimulus_threshold() {
        let sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![50],
            potential_radius: 50,
            potential_pct: 0.8,
            stimulus_threshold: 5,
            ..Default::default()
        })
        .unwrap();

        for (column, &count) in sp.connected_counts().iter().enumerate() {
            assert!(count >= 5, "column {column} has only {count} connected");
        }
    }

    #[test]
    fn test_compute_basic() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![200],
            potential_radius: 50,
            global_inhibition: true,
            local_area_density: 0.1,
            ..Default::default()
        })
        .unwrap();

        let mut input = Sdr::new(&[100]);
        let mut output = Sdr::new(&[200]);

        input.set_sparse(&[1, 5, 10, 20, 30]).unwrap();
        sp.compute(&input, true, &mut output).unwrap();

        assert!(output.get_sum() > 0);
        assert!(output.get_sum() <= 20); // at most 10% of 200
    }

    #[test]
    fn test_compute_rejects_wrong_input_size() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![200],
            ..Default::default()
        })
        .unwrap();

        let input = Sdr::new(&[50]);
        let mut output = Sdr::new(&[200]);
        assert!(sp.compute(&input, false, &mut output).is_err());

        let input = Sdr::new(&[100]);
        let mut output = Sdr::new(&[30]);
        assert!(sp.compute(&input, false, &mut output).is_err());
    }

    #[test]
    fn test_global_tie_break_prefers_high_ids() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![10],
            column_dimensions: vec![8],
            potential_radius: 10,
            potential_pct: 1.0,
            global_inhibition: true,
            local_area_density: 0.0,
            num_active_columns_per_inh_area: 2,
            boost_strength: 0.0,
            ..Default::default()
        })
        .unwrap();

        // Make every column respond identically to every input
        for column in 0..8 {
            sp.set_permanence(column, &[1.0; 10]).unwrap();
        }

        let mut input = Sdr::new(&[10]);
        let mut output = Sdr::new(&[8]);
        input.set_sparse(&[0, 3, 7]).unwrap();

        sp.compute(&input, false, &mut output).unwrap();

        // All overlaps equal: the two highest-id columns win
        assert_eq!(output.get_sparse(), vec![6, 7]);
    }

    #[test]
    fn test_compute_without_learning_is_readonly() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![200],
            potential_radius: 50,
            boost_strength: 2.0,
            ..Default::default()
        })
        .unwrap();

        let permanences_before: Vec<Vec<Real>> =
            (0..5).map(|c| sp.get_permanence(c, 0.0)).collect();
        let overlap_duty_before = sp.overlap_duty_cycles().to_vec();
        let active_duty_before = sp.active_duty_cycles().to_vec();
        let boost_before = sp.boost_factors().to_vec();

        let mut input = Sdr::new(&[100]);
        let mut output = Sdr::new(&[200]);
        input.set_sparse(&[1, 2, 3, 50, 51, 52]).unwrap();
        sp.compute(&input, false, &mut output).unwrap();

        for (c, before) in permanences_before.iter().enumerate() {
            assert_eq!(&sp.get_permanence(c as CellIdx, 0.0), before);
        }
        assert_eq!(sp.overlap_duty_cycles(), overlap_duty_before.as_slice());
        assert_eq!(sp.active_duty_cycles(), active_duty_before.as_slice());
        assert_eq!(sp.boost_factors(), boost_before.as_slice());
    }

    #[test]
    fn test_learning_changes_permanences() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![50],
            column_dimensions: vec![100],
            potential_radius: 25,
            global_inhibition: true,
            ..Default::default()
        })
        .unwrap();

        let mut input = Sdr::new(&[50]);
        let mut output = Sdr::new(&[100]);

        input.set_sparse(&[0, 1, 2, 3, 4]).unwrap();

        let initial_perms = sp.get_permanence(0, 0.0);

        for _ in 0..100 {
            sp.compute(&input, true, &mut output).unwrap();
        }

        let final_perms = sp.get_permanence(0, 0.0);
        assert_ne!(initial_perms, final_perms);
    }

    #[test]
    fn test_sparsity() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![1000],
            potential_radius: 50,
            global_inhibition: true,
            local_area_density: 0.02,
            ..Default::default()
        })
        .unwrap();

        let mut input = Sdr::new(&[100]);
        let mut output = Sdr::new(&[1000]);

        input.set_sparse(&[10, 20, 30, 40, 50]).unwrap();
        sp.compute(&input, false, &mut output).unwrap();

        let sparsity = output.get_sparsity();
        assert!(sparsity > 0.01 && sparsity < 0.05);
    }

    #[test]
    fn test_stability() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![100],
            column_dimensions: vec![200],
            potential_radius: 50,
            global_inhibition: true,
            boost_strength: 0.0,
            ..Default::default()
        })
        .unwrap();

        let mut input = Sdr::new(&[100]);
        let mut output1 = Sdr::new(&[200]);
        let mut output2 = Sdr::new(&[200]);

        input.set_sparse(&[10, 20, 30]).unwrap();

        for _ in 0..100 {
            sp.compute(&input, true, &mut output1).unwrap();
        }

        sp.compute(&input, false, &mut output1).unwrap();
        sp.compute(&input, false, &mut output2).unwrap();

        assert_eq!(output1.get_sparse(), output2.get_sparse());
    }

    #[test]
    fn test_local_inhibition_is_deterministic() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![64],
            column_dimensions: vec![64],
            potential_radius: 8,
            potential_pct: 0.8,
            global_inhibition: false,
            local_area_density: 0.2,
            wrap_around: true,
            ..Default::default()
        })
        .unwrap();

        let mut input = Sdr::new(&[64]);
        let mut output1 = Sdr::new(&[64]);
        let mut output2 = Sdr::new(&[64]);
        input.set_sparse(&[4, 9, 15, 22, 37, 51]).unwrap();

        sp.compute(&input, false, &mut output1).unwrap();
        sp.compute(&input, false, &mut output2).unwrap();

        assert!(output1.get_sum() > 0);
        assert_eq!(output1.get_sparse(), output2.get_sparse());
    }

    #[test]
    fn test_output_weights_carry_boosted_overlaps() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![20],
            column_dimensions: vec![20],
            potential_radius: 20,
            potential_pct: 1.0,
            num_active_columns_per_inh_area: 3,
            local_area_density: 0.0,
            ..Default::default()
        })
        .unwrap();

        let mut input = Sdr::new(&[20]);
        let mut output = Sdr::new(&[20]);
        input.set_sparse(&[0, 1, 2, 3, 4]).unwrap();

        sp.compute(&input, false, &mut output).unwrap();

        let winners = output.get_sparse();
        let weights = output.get_sparse_weights();
        assert_eq!(winners.len(), weights.len());
        for (&w, &c) in weights.iter().zip(&winners) {
            assert_eq!(w as usize, sp.boosted_overlaps()[c as usize] as usize);
        }
    }

    #[test]
    fn test_boosting_updates_factors() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![50],
            column_dimensions: vec![100],
            potential_radius: 25,
            boost_strength: 3.0,
            ..Default::default()
        })
        .unwrap();

        let mut input = Sdr::new(&[50]);
        let mut output = Sdr::new(&[100]);
        input.set_sparse(&[0, 5, 10, 15, 20]).unwrap();

        for _ in 0..20 {
            sp.compute(&input, true, &mut output).unwrap();
        }

        // With nonzero strength, chronically inactive columns boost above 1
        // and the winners decay below the losers.
        let factors = sp.boost_factors();
        assert!(factors.iter().any(|&b| (b - 1.0).abs() > 1e-3));
    }

    #[test]
    fn test_duty_cycles_track_first_iteration() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![50],
            column_dimensions: vec![100],
            potential_radius: 25,
            ..Default::default()
        })
        .unwrap();

        let mut input = Sdr::new(&[50]);
        let mut output = Sdr::new(&[100]);
        input.set_sparse(&[0, 1, 2, 3, 4]).unwrap();

        sp.compute(&input, true, &mut output).unwrap();

        // period = min(1000, 1) = 1, so winners' duty cycles jump to 1
        for &column in &output.get_sparse() {
            assert!((sp.active_duty_cycles()[column as usize] - 1.0).abs() < 1e-6);
        }
        let active_total: Real = sp.active_duty_cycles().iter().sum();
        assert!((active_total - output.get_sum() as Real).abs() < 1e-4);
    }

    #[test]
    fn test_update_round_refreshes_radius() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![32],
            column_dimensions: vec![32],
            potential_radius: 4,
            potential_pct: 1.0,
            global_inhibition: false,
            local_area_density: 0.3,
            ..Default::default()
        })
        .unwrap();
        sp.set_update_period(10);

        let mut input = Sdr::new(&[32]);
        let mut output = Sdr::new(&[32]);
        let mut rng = Random::new(3);

        for _ in 0..25 {
            input.randomize(0.2, &mut rng);
            sp.compute(&input, true, &mut output).unwrap();
        }

        assert!(sp.inhibition_radius() >= 1);
    }

    #[test]
    fn test_potential_pool_roundtrip() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![30],
            column_dimensions: vec![10],
            potential_radius: 30,
            potential_pct: 0.5,
            ..Default::default()
        })
        .unwrap();

        let mut potential = vec![0; 30];
        for i in (0..30).step_by(3) {
            potential[i] = 1;
        }
        sp.set_potential(2, &potential).unwrap();

        assert_eq!(sp.get_potential(2), potential);
        assert_eq!(sp.connections().num_synapses_on_segment(2), 10);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_roundtrip_preserves_behavior() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![60],
            column_dimensions: vec![120],
            potential_radius: 30,
            boost_strength: 1.5,
            ..Default::default()
        })
        .unwrap();

        let mut input = Sdr::new(&[60]);
        let mut output = Sdr::new(&[120]);
        let mut rng = Random::new(11);
        for _ in 0..10 {
            input.randomize(0.1, &mut rng);
            sp.compute(&input, true, &mut output).unwrap();
        }

        let bytes = bincode::serialize(&sp).unwrap();
        let mut restored: SpatialPooler = bincode::deserialize(&bytes).unwrap();

        assert_eq!(sp, restored);

        // The restored pooler continues identically, RNG state included
        let mut output2 = Sdr::new(&[120]);
        for _ in 0..5 {
            input.randomize(0.1, &mut rng);
            sp.compute(&input, true, &mut output).unwrap();
            restored.compute(&input, true, &mut output2).unwrap();
            assert_eq!(output.get_sparse(), output2.get_sparse());
        }
        assert_eq!(sp, restored);
    }
}
