//! Multiresolution IsoSurface Extraction (MISE)
//!
//! [`Mise`] keeps a multiresolution grid over a bounded cube and decides which
//! grid points must be evaluated by the (expensive) implicit field. The caller
//! drives it in rounds:
//!
//! 1. ask for [`Mise::pending_points`],
//! 2. evaluate them and hand the values back with [`Mise::commit_values`],
//! 3. call [`Mise::upsample`] to double the resolution along every axis,
//!
//! and finally materializes the grid with [`Mise::to_dense`] for marching
//! cubes.
//!
//! At level `l` the grid has `resolution << l` points per axis. Upsampling
//! moves every known value from `c` to `2c`; the seven other points of each
//! `2x2x2` fine block get a *derived* copy of the coarse value. Derived values
//! are never reported by [`Mise::get`] but fill the dense export, so regions
//! the refinement policy skips still extract consistently.

use itertools::iproduct;
use log::{debug, info};
use ndarray::Array3;
use occmesh_core::{Error, GridCoord, Point3f, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

const AXIS_BITS: u32 = 21;
const AXIS_MASK: u64 = (1 << AXIS_BITS) - 1;

/// Largest number of points per axis a grid may reach after refinement
pub const MAX_POINTS_PER_AXIS: usize = 1 << AXIS_BITS;

/// Pack an in-range coordinate into a single key.
///
/// Keys sort x-major, then y, then z.
fn pack(coord: GridCoord) -> u64 {
    ((coord[0] as u64) << (2 * AXIS_BITS)) | ((coord[1] as u64) << AXIS_BITS) | coord[2] as u64
}

fn unpack(key: u64) -> GridCoord {
    [
        ((key >> (2 * AXIS_BITS)) & AXIS_MASK) as i64,
        ((key >> AXIS_BITS) & AXIS_MASK) as i64,
        (key & AXIS_MASK) as i64,
    ]
}

/// How the engine chooses the points to evaluate after an upsample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinementPolicy {
    /// Evaluate every point of the finer grid that is not already known
    #[default]
    Uniform,
    /// Evaluate only the fine points inside coarse cells whose corners
    /// straddle the threshold (dilated by one cell), including the last fine
    /// row next to active border cells
    Adaptive,
}

/// Parameters of a MISE run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiseConfig {
    /// Points per axis at level 0
    pub resolution: usize,
    /// Number of upsample rounds allowed
    pub upsample_steps: usize,
    /// Isosurface level
    pub threshold: f32,
    /// Point selection after each upsample
    pub refinement: RefinementPolicy,
}

impl MiseConfig {
    /// Create a configuration with uniform refinement
    pub fn new(resolution: usize, upsample_steps: usize, threshold: f32) -> Self {
        Self {
            resolution,
            upsample_steps,
            threshold,
            refinement: RefinementPolicy::Uniform,
        }
    }

    /// Set the refinement policy
    pub fn with_refinement(mut self, refinement: RefinementPolicy) -> Self {
        self.refinement = refinement;
        self
    }

    /// Points per axis once every upsample round has run
    pub fn final_points_per_axis(&self) -> Option<usize> {
        1usize
            .checked_shl(self.upsample_steps as u32)
            .filter(|_| self.upsample_steps < usize::BITS as usize)
            .and_then(|factor| self.resolution.checked_mul(factor))
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.resolution == 0 {
            return Err(Error::Config("resolution must be greater than 0".to_string()));
        }
        if !self.threshold.is_finite() {
            return Err(Error::Config(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        match self.final_points_per_axis() {
            Some(points) if points <= MAX_POINTS_PER_AXIS => Ok(()),
            _ => Err(Error::Config(format!(
                "resolution {} with {} upsample step(s) exceeds {} points per axis",
                self.resolution, self.upsample_steps, MAX_POINTS_PER_AXIS
            ))),
        }
    }
}

/// State of a registered grid point at the current level
#[derive(Debug, Clone, Copy, PartialEq)]
enum PointState {
    /// Evaluated at this level; immutable
    Known(f32),
    /// Copied from the enclosing coarse point; not an evaluation
    Derived(f32),
}

impl PointState {
    fn value(self) -> f32 {
        match self {
            PointState::Known(v) | PointState::Derived(v) => v,
        }
    }
}

/// Counters describing the grid at its current level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiseStats {
    pub level: usize,
    pub points_per_axis: usize,
    pub known: usize,
    pub derived: usize,
    pub pending: usize,
}

/// Dense snapshot of the grid, ready for isosurface extraction
#[derive(Debug, Clone)]
pub struct DenseGrid {
    /// Values indexed `[x, y, z]` relative to `offset`
    pub values: Array3<f32>,
    /// Grid coordinate of `values[[0, 0, 0]]`
    pub offset: GridCoord,
    /// Refinement level the snapshot was taken at
    pub level: usize,
    /// Points per axis of the full grid at that level
    pub points_per_axis: usize,
}

impl DenseGrid {
    /// Number of samples along each axis
    pub fn dims(&self) -> [usize; 3] {
        let (nx, ny, nz) = self.values.dim();
        [nx, ny, nz]
    }

    /// Value at a grid coordinate, `None` outside the snapshot
    pub fn get(&self, coord: GridCoord) -> Option<f32> {
        let dims = self.dims();
        let mut index = [0usize; 3];
        for axis in 0..3 {
            let local = coord[axis] - self.offset[axis];
            if local < 0 || local >= dims[axis] as i64 {
                return None;
            }
            index[axis] = local as usize;
        }
        Some(self.values[index])
    }
}

/// Multiresolution grid with a value cache
#[derive(Debug, Clone)]
pub struct Mise {
    config: MiseConfig,
    level: usize,
    points: HashMap<u64, PointState>,
    pending: BTreeSet<u64>,
}

impl Mise {
    /// Set up a grid at the coarse level with uniform refinement.
    ///
    /// Every one of the `resolution^3` coarse points starts pending.
    pub fn new(resolution: usize, upsample_steps: usize, threshold: f32) -> Result<Self> {
        Self::with_config(MiseConfig::new(resolution, upsample_steps, threshold))
    }

    /// Set up a grid from a full configuration
    pub fn with_config(config: MiseConfig) -> Result<Self> {
        config.validate()?;

        let r = config.resolution as i64;
        let pending: BTreeSet<u64> = iproduct!(0..r, 0..r, 0..r)
            .map(|(x, y, z)| pack([x, y, z]))
            .collect();

        debug!(
            "MISE initialized: {}^3 coarse points, {} upsample step(s), threshold {}",
            config.resolution, config.upsample_steps, config.threshold
        );

        Ok(Self {
            config,
            level: 0,
            points: HashMap::with_capacity(pending.len()),
            pending,
        })
    }

    /// The configuration this grid was built with
    pub fn config(&self) -> &MiseConfig {
        &self.config
    }

    /// Current refinement level (0 = coarse)
    pub fn level(&self) -> usize {
        self.level
    }

    /// Isosurface level
    pub fn threshold(&self) -> f32 {
        self.config.threshold
    }

    /// Points per axis at the current level
    pub fn points_per_axis(&self) -> usize {
        self.config.resolution << self.level
    }

    /// Upsample rounds still available
    pub fn remaining_upsamples(&self) -> usize {
        self.config.upsample_steps - self.level
    }

    fn in_range(&self, coord: GridCoord) -> bool {
        let n = self.points_per_axis() as i64;
        coord.iter().all(|&c| (0..n).contains(&c))
    }

    fn checked_key(&self, coord: GridCoord) -> Result<u64> {
        if self.in_range(coord) {
            Ok(pack(coord))
        } else {
            Err(Error::InvalidCoordinate {
                coord,
                points_per_axis: self.points_per_axis(),
            })
        }
    }

    /// Register a coordinate as needing a value.
    ///
    /// Known and already pending coordinates are left as they are.
    pub fn mark_point_for_evaluation(&mut self, coord: GridCoord) -> Result<()> {
        let key = self.checked_key(coord)?;
        if !matches!(self.points.get(&key), Some(PointState::Known(_))) {
            self.pending.insert(key);
        }
        Ok(())
    }

    /// All coordinates still waiting for a value, in x-major order
    pub fn pending_points(&self) -> Vec<GridCoord> {
        self.pending.iter().map(|&key| unpack(key)).collect()
    }

    /// Number of coordinates still waiting for a value
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Write evaluated values back.
    ///
    /// Every coordinate is range-checked before anything is written, so a
    /// failing call leaves the grid untouched. A coordinate that is already
    /// known keeps its first value.
    pub fn commit_values<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (GridCoord, f32)>,
    {
        let keyed = values
            .into_iter()
            .map(|(coord, value)| self.checked_key(coord).map(|key| (key, value)))
            .collect::<Result<Vec<_>>>()?;

        for (key, value) in keyed {
            self.pending.remove(&key);
            match self.points.get(&key) {
                Some(PointState::Known(_)) => {}
                _ => {
                    self.points.insert(key, PointState::Known(value));
                }
            }
        }

        Ok(())
    }

    /// Stored value of an evaluated coordinate
    pub fn get(&self, coord: GridCoord) -> Result<f32> {
        let key = self.checked_key(coord)?;
        match self.points.get(&key) {
            Some(PointState::Known(value)) => Ok(*value),
            _ => Err(Error::UnknownPoint { coord }),
        }
    }

    /// Whether a coordinate has an evaluated value at the current level
    pub fn is_known(&self, coord: GridCoord) -> bool {
        self.known_value(coord).is_some()
    }

    fn known_value(&self, coord: GridCoord) -> Option<f32> {
        if !self.in_range(coord) {
            return None;
        }
        match self.points.get(&pack(coord)) {
            Some(PointState::Known(value)) => Some(*value),
            _ => None,
        }
    }

    /// Trilinear interpolation of the known values around a location in grid
    /// coordinates.
    ///
    /// Neighbors without a known value contribute 0. At integer locations the
    /// result is exactly the stored value (or 0). Locations with no grid
    /// point among their neighbors (including NaN) evaluate to 0.
    pub fn evaluate_point(&self, loc: &Point3f) -> f32 {
        let n = self.points_per_axis() as f32;
        if ![loc.x, loc.y, loc.z].iter().all(|&c| c >= -1.0 && c < n) {
            return 0.0;
        }

        let p0 = [
            loc.x.floor() as i64,
            loc.y.floor() as i64,
            loc.z.floor() as i64,
        ];
        let value = |dx: i64, dy: i64, dz: i64| {
            self.known_value([p0[0] + dx, p0[1] + dy, p0[2] + dz])
                .unwrap_or(0.0)
        };

        let x = loc.x - p0[0] as f32;
        let y = loc.y - p0[1] as f32;
        let z = loc.z - p0[2] as f32;

        let c00 = value(0, 0, 0) * (1.0 - x) + value(1, 0, 0) * x;
        let c01 = value(0, 0, 1) * (1.0 - x) + value(1, 0, 1) * x;
        let c10 = value(0, 1, 0) * (1.0 - x) + value(1, 1, 0) * x;
        let c11 = value(0, 1, 1) * (1.0 - x) + value(1, 1, 1) * x;

        let c0 = c00 * (1.0 - y) + c10 * y;
        let c1 = c01 * (1.0 - y) + c11 * y;

        c0 * (1.0 - z) + c1 * z
    }

    /// Materialize the bounding box of every registered coordinate.
    ///
    /// Known values win over derived ones; pending coordinates without a
    /// derived value are 0.
    pub fn to_dense(&self) -> DenseGrid {
        let keys = self.points.keys().chain(self.pending.iter());
        let mut min = [i64::MAX; 3];
        let mut max = [i64::MIN; 3];
        let mut any = false;
        for &key in keys {
            let coord = unpack(key);
            for axis in 0..3 {
                min[axis] = min[axis].min(coord[axis]);
                max[axis] = max[axis].max(coord[axis]);
            }
            any = true;
        }

        if !any {
            return DenseGrid {
                values: Array3::zeros((0, 0, 0)),
                offset: [0, 0, 0],
                level: self.level,
                points_per_axis: self.points_per_axis(),
            };
        }

        let shape = (
            (max[0] - min[0] + 1) as usize,
            (max[1] - min[1] + 1) as usize,
            (max[2] - min[2] + 1) as usize,
        );
        let mut values = Array3::zeros(shape);
        for (&key, state) in &self.points {
            let coord = unpack(key);
            let index = [
                (coord[0] - min[0]) as usize,
                (coord[1] - min[1]) as usize,
                (coord[2] - min[2]) as usize,
            ];
            values[index] = state.value();
        }

        DenseGrid {
            values,
            offset: min,
            level: self.level,
            points_per_axis: self.points_per_axis(),
        }
    }

    /// Double the number of points along every axis.
    ///
    /// Known values move to the even fine coordinates; the rest of each
    /// `2x2x2` block receives a derived copy. Pending coarse points leave
    /// their whole fine block pending. The refinement policy then decides
    /// which of the derived points must be evaluated.
    pub fn upsample(&mut self) -> Result<()> {
        if self.level >= self.config.upsample_steps {
            return Err(Error::UpsampleLimitExceeded {
                steps: self.config.upsample_steps,
            });
        }

        let coarse_points = std::mem::take(&mut self.points);
        let coarse_pending = std::mem::take(&mut self.pending);
        let coarse_n = self.points_per_axis() as i64;

        let mut points = HashMap::with_capacity(coarse_points.len() * 8);
        let mut pending = BTreeSet::new();

        for (&key, &state) in &coarse_points {
            let [x, y, z] = unpack(key);
            for (dx, dy, dz) in iproduct!(0..2, 0..2, 0..2) {
                let fine = pack([2 * x + dx, 2 * y + dy, 2 * z + dz]);
                let fine_state = match state {
                    PointState::Known(v) if (dx, dy, dz) == (0, 0, 0) => PointState::Known(v),
                    other => PointState::Derived(other.value()),
                };
                points.insert(fine, fine_state);
            }
        }

        for &key in &coarse_pending {
            let [x, y, z] = unpack(key);
            for (dx, dy, dz) in iproduct!(0..2, 0..2, 0..2) {
                let fine = pack([2 * x + dx, 2 * y + dy, 2 * z + dz]);
                // A pending coarse point that also had a derived value
                // carried it over above; it stays pending either way.
                pending.insert(fine);
            }
        }

        match self.config.refinement {
            RefinementPolicy::Uniform => {
                for (&key, state) in &points {
                    if matches!(state, PointState::Derived(_)) {
                        pending.insert(key);
                    }
                }
            }
            RefinementPolicy::Adaptive => {
                let active = active_cells(&coarse_points, coarse_n, self.config.threshold);
                let last_cell = coarse_n - 2;
                // Cells on the upper border also own the fine row past the
                // last coarse point
                let reach = |c: i64| if c == last_cell { 3 } else { 2 };
                for &cell in &active {
                    let [x, y, z] = unpack(cell);
                    for (dx, dy, dz) in iproduct!(0..=reach(x), 0..=reach(y), 0..=reach(z)) {
                        let fine = [2 * x + dx, 2 * y + dy, 2 * z + dz];
                        let key = pack(fine);
                        if !matches!(points.get(&key), Some(PointState::Known(_))) {
                            pending.insert(key);
                        }
                    }
                }
                debug!("adaptive refinement: {} active coarse cell(s)", active.len());
            }
        }

        self.points = points;
        self.pending = pending;
        self.level += 1;

        info!(
            "MISE level {}: {}^3 points, {} pending",
            self.level,
            self.points_per_axis(),
            self.pending.len()
        );

        Ok(())
    }

    /// Counters for the current level
    pub fn stats(&self) -> MiseStats {
        let known = self
            .points
            .values()
            .filter(|state| matches!(state, PointState::Known(_)))
            .count();
        MiseStats {
            level: self.level,
            points_per_axis: self.points_per_axis(),
            known,
            derived: self.points.len() - known,
            pending: self.pending.len(),
        }
    }
}

/// Coarse cells whose corners straddle `threshold`, dilated by one cell.
///
/// A cell with a corner that has no value yet counts as active.
fn active_cells(points: &HashMap<u64, PointState>, n: i64, threshold: f32) -> HashSet<u64> {
    let cells = n - 1;
    let mut crossing = Vec::new();

    for (x, y, z) in iproduct!(0..cells, 0..cells, 0..cells) {
        let mut below = false;
        let mut above = false;
        let mut missing = false;
        for (dx, dy, dz) in iproduct!(0..2, 0..2, 0..2) {
            match points.get(&pack([x + dx, y + dy, z + dz])) {
                Some(state) if state.value() < threshold => below = true,
                Some(_) => above = true,
                None => missing = true,
            }
        }
        if missing || (below && above) {
            crossing.push([x, y, z]);
        }
    }

    let mut active = HashSet::with_capacity(crossing.len() * 4);
    for [x, y, z] in crossing {
        for (dx, dy, dz) in iproduct!(-1..=1, -1..=1, -1..=1) {
            let cell = [x + dx, y + dy, z + dz];
            if cell.iter().all(|&c| (0..cells).contains(&c)) {
                active.insert(pack(cell));
            }
        }
    }
    active
}
