//! Voxel cells and their integer grid coordinates.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::GridError;

/// Integer coordinate triple identifying a voxel within its grid.
///
/// The textual label is `"{x}_{y}_{z}"`. Ordering follows the canonical
/// enumeration order of the grid: `z` first, then `y`, then `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelIndex {
    /// Index along the x axis.
    pub x: usize,
    /// Index along the y axis.
    pub y: usize,
    /// Index along the z axis.
    pub z: usize,
}

impl VoxelIndex {
    /// Construct an index from its three components.
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Components as `[x, y, z]`.
    pub fn components(&self) -> [usize; 3] {
        [self.x, self.y, self.z]
    }

    /// Render the `x_y_z` label.
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// Decode a label of the form `x_y_z`.
    pub fn parse_label(label: &str) -> Result<Self, GridError> {
        let malformed = || GridError::MalformedLabel(label.to_string());
        let mut parts = label.split('_');
        let mut next = || -> Result<usize, GridError> {
            parts
                .next()
                .ok_or_else(malformed)?
                .parse::<usize>()
                .map_err(|_| malformed())
        };
        let index = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(index)
    }
}

impl fmt::Display for VoxelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.x, self.y, self.z)
    }
}

impl FromStr for VoxelIndex {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_label(s)
    }
}

impl Ord for VoxelIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.z, self.y, self.x).cmp(&(other.z, other.y, other.x))
    }
}

impl PartialOrd for VoxelIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for VoxelIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VoxelIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Self::parse_label(&label).map_err(serde::de::Error::custom)
    }
}

/// A single axis-aligned cubic cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voxel {
    /// Grid coordinates of the cell.
    pub index: VoxelIndex,
    /// Lower corner (inclusive).
    pub start: [f64; 3],
    /// Upper corner (exclusive).
    pub end: [f64; 3],
    /// Midpoint of the cell.
    pub centre: [f64; 3],
}

impl Voxel {
    /// Half-open containment: `start <= p < end` on every axis.
    ///
    /// Points on a shared face belong to the voxel whose `start` lies on that
    /// face, so adjacent voxels never both claim a point.
    pub fn contains(&self, point: [f64; 3]) -> bool {
        (0..3).all(|axis| self.start[axis] <= point[axis] && point[axis] < self.end[axis])
    }

    /// Label of this voxel.
    pub fn label(&self) -> String {
        self.index.label()
    }
}
