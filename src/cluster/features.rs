use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::ClusterError;
use crate::occupancy::VoxelTrack;

/// Structure left out of the feature matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedStructure {
    /// Structure identifier.
    pub structure_id: String,
    /// Clustering positions with no voxel for this structure.
    pub missing_positions: Vec<usize>,
}

/// Per-structure feature vectors built from voxel coordinates.
///
/// Row `i` always belongs to `structure_ids()[i]`. Structures that lack a
/// clustering position are removed before any row is built and listed in
/// [`FeatureMatrix::excluded`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    positions: Vec<usize>,
    structure_ids: Vec<String>,
    rows: Vec<Vec<f64>>,
    excluded: Vec<ExcludedStructure>,
}

impl FeatureMatrix {
    /// Concatenate `(x, y, z)` of the voxel at each clustering position.
    ///
    /// `structure_order` fixes the row order; ids absent from `used_voxels`
    /// are excluded with every position missing. Repeated ids keep their
    /// first occurrence only.
    pub fn build(
        positions: &[usize],
        used_voxels: &BTreeMap<String, VoxelTrack>,
        structure_order: &[String],
    ) -> Result<Self, ClusterError> {
        if positions.is_empty() {
            return Err(ClusterError::EmptyPositions);
        }
        if let Some(&bad) = positions.iter().find(|&&p| p == 0) {
            return Err(ClusterError::InvalidParameter(format!(
                "positions are 1-based, got {bad}"
            )));
        }

        let mut structure_ids = Vec::with_capacity(structure_order.len());
        let mut rows = Vec::with_capacity(structure_order.len());
        let mut excluded = Vec::new();
        let mut seen = BTreeSet::new();

        for structure_id in structure_order {
            if !seen.insert(structure_id.as_str()) {
                warn!(structure = %structure_id, "structure listed twice, keeping the first entry");
                continue;
            }
            let track = used_voxels.get(structure_id);
            match track.map(|t| feature_row(structure_id, t, positions)) {
                Some(Ok(row)) => {
                    structure_ids.push(structure_id.clone());
                    rows.push(row);
                }
                _ => excluded.push(ExcludedStructure {
                    structure_id: structure_id.clone(),
                    missing_positions: positions
                        .iter()
                        .copied()
                        .filter(|&p| track.and_then(|t| t.label_at(p)).is_none())
                        .collect(),
                }),
            }
        }

        Ok(Self {
            positions: positions.to_vec(),
            structure_ids,
            rows,
            excluded,
        })
    }

    /// Clustering positions, in feature order.
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Structure id of each row.
    pub fn structure_ids(&self) -> &[String] {
        &self.structure_ids
    }

    /// Feature rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Structures left out of the matrix.
    pub fn excluded(&self) -> &[ExcludedStructure] {
        &self.excluded
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no structure qualified.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Width of every row: three per clustering position.
    pub fn dimensions(&self) -> usize {
        3 * self.positions.len()
    }
}

/// Feature vector of one structure: `(x, y, z)` per clustering position.
pub fn feature_row(
    structure_id: &str,
    track: &VoxelTrack,
    positions: &[usize],
) -> Result<Vec<f64>, ClusterError> {
    let mut row = Vec::with_capacity(3 * positions.len());
    for &position in positions {
        let voxel = track
            .label_at(position)
            .ok_or_else(|| ClusterError::MissingPosition {
                structure_id: structure_id.to_string(),
                position,
            })?;
        row.extend(voxel.components().iter().map(|&c| c as f64));
    }
    Ok(row)
}
