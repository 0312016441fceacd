//! Regular voxel partition of the peptide-binding groove.
//!
//! A grid is an axis-aligned box centred on a reference point (shifted by
//! integer offsets) and cut into cubic voxels of a fixed edge length:
//! - Voxels are enumerated z-major, then y, then x; that order is canonical
//! - Containment is half-open (`start <= p < end`) so the voxels partition the box
//! - Identical parameters always produce an identical grid and configuration hash

mod voxel;

pub use voxel::{Voxel, VoxelIndex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Largest number of voxels a grid may hold.
pub const MAX_VOXELS: usize = 1 << 22;

/// Errors raised while building or addressing a grid.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    /// Grid parameters cannot describe a non-empty partition.
    #[error("invalid grid configuration: {0}")]
    InvalidConfiguration(String),

    /// A voxel label did not have the `x_y_z` form.
    #[error("malformed voxel label '{0}'")]
    MalformedLabel(String),
}

/// Parameters that fully determine a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    /// Reference point the box is centred on.
    pub origin: [f64; 3],
    /// Box length, width and height.
    pub extents: [f64; 3],
    /// Edge length of a voxel.
    pub voxel_size: f64,
    /// Extra voxel shells added along every axis at the upper edge.
    pub range_offset: usize,
    /// Shift of the box along x, in coordinate units.
    pub x_offset: i32,
    /// Shift of the box along y, in coordinate units.
    pub y_offset: i32,
    /// Shift of the box along z, in coordinate units.
    pub z_offset: i32,
}

impl Default for GridParams {
    /// Groove box used for class I structures: centred on the antigen-binding
    /// domain of 1HHK, shifted 8Å along y, with one boundary shell.
    fn default() -> Self {
        Self {
            origin: [-42.365, 56.031, 63.670],
            extents: [36.0, 20.0, 20.0],
            voxel_size: 1.0,
            range_offset: 1,
            x_offset: 0,
            y_offset: 8,
            z_offset: 0,
        }
    }
}

impl GridParams {
    /// Parameters with no offsets and no boundary shell.
    pub fn new(origin: [f64; 3], extents: [f64; 3], voxel_size: f64) -> Self {
        Self {
            origin,
            extents,
            voxel_size,
            range_offset: 0,
            x_offset: 0,
            y_offset: 0,
            z_offset: 0,
        }
    }

    /// Set the number of extra boundary shells.
    pub fn with_range_offset(mut self, range_offset: usize) -> Self {
        self.range_offset = range_offset;
        self
    }

    /// Set the per-axis integer offsets.
    pub fn with_offsets(mut self, x_offset: i32, y_offset: i32, z_offset: i32) -> Self {
        self.x_offset = x_offset;
        self.y_offset = y_offset;
        self.z_offset = z_offset;
        self
    }

    /// Reject parameters that cannot describe a non-empty partition.
    pub fn validate(&self) -> Result<(), GridError> {
        if !(self.voxel_size.is_finite() && self.voxel_size > 0.0) {
            return Err(GridError::InvalidConfiguration(format!(
                "voxel size must be positive, got {}",
                self.voxel_size
            )));
        }
        if self.origin.iter().any(|c| !c.is_finite()) {
            return Err(GridError::InvalidConfiguration(
                "origin must be finite".to_string(),
            ));
        }
        for (axis, extent) in ["length", "width", "height"].iter().zip(self.extents) {
            if !(extent.is_finite() && extent > 0.0) {
                return Err(GridError::InvalidConfiguration(format!(
                    "box {axis} must be positive, got {extent}"
                )));
            }
        }
        let counts = self.checked_counts().ok_or_else(|| {
            GridError::InvalidConfiguration(format!(
                "voxel count per axis overflows for extents {:?} at voxel size {}",
                self.extents, self.voxel_size
            ))
        })?;
        let total = counts
            .iter()
            .try_fold(1usize, |acc, &count| acc.checked_mul(count))
            .filter(|&total| total <= MAX_VOXELS);
        if total.is_none() {
            return Err(GridError::InvalidConfiguration(format!(
                "grid of {counts:?} voxels exceeds the limit of {MAX_VOXELS}"
            )));
        }
        if counts.iter().any(|&count| count == 0) {
            return Err(GridError::InvalidConfiguration(format!(
                "voxel size {} leaves an empty axis for extents {:?}",
                self.voxel_size, self.extents
            )));
        }
        Ok(())
    }

    /// Lower corner of the box: `origin - extent / 2 + offset`.
    pub fn start(&self) -> [f64; 3] {
        let offsets = [self.x_offset, self.y_offset, self.z_offset];
        [0, 1, 2].map(|axis| {
            self.origin[axis] - self.extents[axis] / 2.0 + f64::from(offsets[axis])
        })
    }

    /// Voxels per axis: `floor(extent / voxel_size) + range_offset`.
    ///
    /// Only meaningful for parameters that pass [`GridParams::validate`].
    pub fn counts(&self) -> [usize; 3] {
        self.extents
            .map(|extent| (extent / self.voxel_size).floor() as usize + self.range_offset)
    }

    fn checked_counts(&self) -> Option<[usize; 3]> {
        let mut counts = [0usize; 3];
        for (count, extent) in counts.iter_mut().zip(self.extents) {
            let cells = (extent / self.voxel_size).floor();
            if cells >= MAX_VOXELS as f64 {
                return None;
            }
            *count = (cells as usize).checked_add(self.range_offset)?;
        }
        Some(counts)
    }

    /// Stable identifier of this configuration.
    ///
    /// BLAKE3 over the little-endian encoding of every parameter, truncated to
    /// 32 hex characters. Used to name artifact directories.
    pub fn config_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for value in self.origin.iter().chain(self.extents.iter()) {
            hasher.update(&value.to_le_bytes());
        }
        hasher.update(&self.voxel_size.to_le_bytes());
        hasher.update(&(self.range_offset as u64).to_le_bytes());
        for offset in [self.x_offset, self.y_offset, self.z_offset] {
            hasher.update(&offset.to_le_bytes());
        }
        hasher.finalize().to_hex().as_str()[..32].to_string()
    }
}

/// Immutable voxel partition built from [`GridParams`].
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    params: GridParams,
    start: [f64; 3],
    counts: [usize; 3],
    voxels: Vec<Voxel>,
    hash: String,
}

impl VoxelGrid {
    /// Build the grid, enumerating voxels in canonical (z, y, x) order.
    pub fn build(params: GridParams) -> Result<Self, GridError> {
        params.validate()?;

        let start = params.start();
        let counts = params.counts();
        let size = params.voxel_size;
        let [nx, ny, nz] = counts;

        let mut voxels = Vec::with_capacity(nx * ny * nz);
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let cell = [x, y, z];
                    voxels.push(Voxel {
                        index: VoxelIndex::new(x, y, z),
                        start: [0, 1, 2].map(|a| start[a] + cell[a] as f64 * size),
                        end: [0, 1, 2].map(|a| start[a] + (cell[a] + 1) as f64 * size),
                        centre: [0, 1, 2].map(|a| start[a] + (cell[a] as f64 + 0.5) * size),
                    });
                }
            }
        }

        let hash = params.config_hash();
        debug!(
            voxels = voxels.len(),
            nx, ny, nz,
            hash = %hash,
            "built voxel grid"
        );

        Ok(Self {
            params,
            start,
            counts,
            voxels,
            hash,
        })
    }

    /// Parameters the grid was built from.
    pub fn params(&self) -> &GridParams {
        &self.params
    }

    /// Configuration hash (see [`GridParams::config_hash`]).
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Voxels per axis `[nx, ny, nz]`.
    pub fn counts(&self) -> [usize; 3] {
        self.counts
    }

    /// Edge length of a voxel.
    pub fn voxel_size(&self) -> f64 {
        self.params.voxel_size
    }

    /// Total number of voxels.
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    /// Whether the grid has no voxels (never true for a validated grid).
    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// Lower and (exclusive) upper corner of the whole partition.
    pub fn bounds(&self) -> ([f64; 3], [f64; 3]) {
        let upper = [0, 1, 2]
            .map(|a| self.start[a] + self.counts[a] as f64 * self.params.voxel_size);
        (self.start, upper)
    }

    /// Voxels in canonical order.
    pub fn voxels(&self) -> impl Iterator<Item = &Voxel> {
        self.voxels.iter()
    }

    /// Labels in canonical order.
    pub fn labels(&self) -> impl Iterator<Item = VoxelIndex> + '_ {
        self.voxels.iter().map(|voxel| voxel.index)
    }

    /// First voxel in canonical order.
    pub fn first_voxel(&self) -> Option<&Voxel> {
        self.voxels.first()
    }

    /// Last voxel in canonical order.
    pub fn last_voxel(&self) -> Option<&Voxel> {
        self.voxels.last()
    }

    /// Voxel with the given grid coordinates.
    pub fn voxel(&self, index: VoxelIndex) -> Option<&Voxel> {
        let [nx, ny, nz] = self.counts;
        if index.x >= nx || index.y >= ny || index.z >= nz {
            return None;
        }
        self.voxels.get(index.z * ny * nx + index.y * nx + index.x)
    }

    /// Voxel with the given `x_y_z` label.
    pub fn voxel_by_label(&self, label: &str) -> Result<Option<&Voxel>, GridError> {
        Ok(self.voxel(VoxelIndex::parse_label(label)?))
    }

    /// Locate the voxel containing `point` by direct index arithmetic.
    ///
    /// Gives the same answer as [`VoxelGrid::locate_by_scan`]: the arithmetic
    /// guess is confirmed against the stored half-open bounds and nudged by one
    /// cell when floating-point rounding lands it on the wrong side of a face.
    pub fn locate(&self, point: [f64; 3]) -> Option<VoxelIndex> {
        let size = self.params.voxel_size;
        let mut cell = [0usize; 3];
        for axis in 0..3 {
            let relative = (point[axis] - self.start[axis]) / size;
            if !relative.is_finite() {
                return None;
            }
            let guess = relative.floor();
            if guess < -1.0 || guess > self.counts[axis] as f64 {
                return None;
            }
            cell[axis] = self.resolve_axis(axis, guess as i64, point[axis])?;
        }
        Some(VoxelIndex::new(cell[0], cell[1], cell[2]))
    }

    fn resolve_axis(&self, axis: usize, guess: i64, coordinate: f64) -> Option<usize> {
        let size = self.params.voxel_size;
        let count = self.counts[axis] as i64;
        (guess - 1..=guess + 1)
            .filter(|&i| (0..count).contains(&i))
            .find(|&i| {
                let lower = self.start[axis] + i as f64 * size;
                let upper = self.start[axis] + (i + 1) as f64 * size;
                lower <= coordinate && coordinate < upper
            })
            .map(|i| i as usize)
    }

    /// Locate the first voxel in canonical order whose bounds contain `point`.
    ///
    /// Linear in the number of voxels; kept as the reference behaviour.
    pub fn locate_by_scan(&self, point: [f64; 3]) -> Option<VoxelIndex> {
        self.voxels
            .iter()
            .find(|voxel| voxel.contains(point))
            .map(|voxel| voxel.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid() -> VoxelGrid {
        VoxelGrid::build(GridParams::new([0.0, 0.0, 0.0], [2.0, 2.0, 2.0], 1.0)).unwrap()
    }

    #[test]
    fn start_is_centred_and_offset() {
        let params = GridParams::new([10.0, 20.0, 30.0], [4.0, 6.0, 8.0], 1.0)
            .with_offsets(1, -2, 0);
        assert_eq!(params.start(), [9.0, 15.0, 26.0]);
    }

    #[test]
    fn counts_include_range_offset() {
        let params = GridParams::new([0.0; 3], [3.5, 2.0, 1.0], 1.0).with_range_offset(1);
        assert_eq!(params.counts(), [4, 3, 2]);
    }

    #[test]
    fn unit_grid_has_eight_voxels_in_canonical_order() {
        let grid = unit_grid();
        let labels: Vec<String> = grid.labels().map(|l| l.label()).collect();
        assert_eq!(
            labels,
            vec!["0_0_0", "1_0_0", "0_1_0", "1_1_0", "0_0_1", "1_0_1", "0_1_1", "1_1_1"]
        );
        assert_eq!(grid.first_voxel().unwrap().label(), "0_0_0");
        assert_eq!(grid.last_voxel().unwrap().label(), "1_1_1");
    }

    #[test]
    fn voxel_geometry_matches_index() {
        let grid = unit_grid();
        let voxel = grid.voxel(VoxelIndex::new(1, 0, 1)).unwrap();
        assert_eq!(voxel.start, [0.0, -1.0, 0.0]);
        assert_eq!(voxel.end, [1.0, 0.0, 1.0]);
        assert_eq!(voxel.centre, [0.5, -0.5, 0.5]);
    }

    #[test]
    fn non_positive_voxel_size_is_rejected() {
        for size in [0.0, -1.0, f64::NAN] {
            let params = GridParams::new([0.0; 3], [2.0; 3], size);
            assert!(matches!(
                VoxelGrid::build(params),
                Err(GridError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn zero_extent_is_rejected() {
        let params = GridParams::new([0.0; 3], [2.0, 0.0, 2.0], 1.0);
        assert!(VoxelGrid::build(params).is_err());
    }

    #[test]
    fn extent_smaller_than_voxel_is_rejected_without_shell() {
        let params = GridParams::new([0.0; 3], [0.5, 2.0, 2.0], 1.0);
        assert!(VoxelGrid::build(params.clone()).is_err());
        assert!(VoxelGrid::build(params.with_range_offset(1)).is_ok());
    }

    #[test]
    fn oversized_grid_is_rejected_before_allocation() {
        let params = GridParams::new([0.0; 3], [1e7, 1e7, 1e7], 1.0);
        assert!(matches!(
            params.validate(),
            Err(GridError::InvalidConfiguration(_))
        ));
        assert!(VoxelGrid::build(params).is_err());

        let huge_offset = GridParams::new([0.0; 3], [2.0; 3], 1.0).with_range_offset(usize::MAX);
        assert!(huge_offset.validate().is_err());
    }

    #[test]
    fn locate_agrees_with_scan_on_faces() {
        let grid = unit_grid();
        for point in [
            [-1.0, -1.0, -1.0],
            [0.0, 0.0, 0.0],
            [-0.5, 0.0, 0.999],
            [0.999_999, -1.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, -1.000_001, 0.0],
        ] {
            assert_eq!(grid.locate(point), grid.locate_by_scan(point), "{point:?}");
        }
    }

    #[test]
    fn hash_depends_on_every_parameter() {
        let base = GridParams::default();
        let mut variants = vec![base.clone()];
        variants.push(GridParams { voxel_size: 2.0, ..base.clone() });
        variants.push(GridParams { range_offset: 0, ..base.clone() });
        variants.push(GridParams { y_offset: 0, ..base.clone() });
        variants.push(GridParams { origin: [0.0; 3], ..base.clone() });

        let hashes: std::collections::HashSet<String> =
            variants.iter().map(|p| p.config_hash()).collect();
        assert_eq!(hashes.len(), variants.len());
        assert_eq!(base.config_hash(), GridParams::default().config_hash());
        assert_eq!(base.config_hash().len(), 32);
    }
}
