//! Voxel usage across a structure set.
//!
//! Two tables are derived from the per-structure voxelizations:
//! - `used_voxels`: structure id → voxel per position
//! - `position_voxel_counts`: position → voxel → structures occupying it
//!
//! For every position the counts sum to the number of structures that have a
//! voxel recorded at that position.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::grid::VoxelIndex;
use crate::voxelize::StructureVoxelization;

/// Voxels visited by one structure, keyed by position.
///
/// Keeping the position explicit means a missing (out-of-bounds) position can
/// never shift later voxels onto the wrong slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelTrack {
    /// Number of residues in the structure.
    pub residue_count: usize,
    /// Voxel per assigned position.
    pub labels: BTreeMap<usize, VoxelIndex>,
}

impl VoxelTrack {
    /// Track with every position `1..=labels.len()` assigned.
    pub fn from_labels(labels: impl IntoIterator<Item = VoxelIndex>) -> Self {
        let labels: BTreeMap<usize, VoxelIndex> = labels
            .into_iter()
            .enumerate()
            .map(|(idx, label)| (idx + 1, label))
            .collect();
        Self {
            residue_count: labels.len(),
            labels,
        }
    }

    /// Track from a slot list where `None` marks an unassigned position.
    pub fn from_slots(slots: &[Option<VoxelIndex>]) -> Self {
        Self {
            residue_count: slots.len(),
            labels: slots
                .iter()
                .enumerate()
                .filter_map(|(idx, slot)| slot.map(|label| (idx + 1, label)))
                .collect(),
        }
    }

    /// Voxel at a position.
    pub fn label_at(&self, position: usize) -> Option<VoxelIndex> {
        self.labels.get(&position).copied()
    }

    /// Whether every position `1..=residue_count` has a voxel.
    pub fn is_complete(&self) -> bool {
        self.labels.len() == self.residue_count
    }

    /// One slot per position `1..=residue_count`.
    pub fn slots(&self) -> Vec<Option<VoxelIndex>> {
        (1..=self.residue_count)
            .map(|position| self.label_at(position))
            .collect()
    }

    /// Assigned voxels in position order.
    pub fn ordered_labels(&self) -> Vec<VoxelIndex> {
        self.labels.values().copied().collect()
    }
}

impl From<&StructureVoxelization> for VoxelTrack {
    fn from(voxelization: &StructureVoxelization) -> Self {
        Self {
            residue_count: voxelization.residue_count,
            labels: voxelization.positioned_labels().collect(),
        }
    }
}

/// Structures occupying one voxel at one position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelUsage {
    /// Number of distinct structures.
    pub count: usize,
    /// Structure ids, each listed once; order is insertion order.
    pub members: Vec<String>,
}

impl VoxelUsage {
    fn record(&mut self, structure_id: &str) -> bool {
        if self.members.iter().any(|member| member == structure_id) {
            return false;
        }
        self.members.push(structure_id.to_string());
        self.count += 1;
        true
    }
}

/// Position → voxel → usage.
pub type PositionVoxelCounts = BTreeMap<usize, BTreeMap<VoxelIndex, VoxelUsage>>;

/// Derived occupancy tables for a structure set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OccupancyTables {
    /// Voxels used by each structure.
    pub used_voxels: BTreeMap<String, VoxelTrack>,
    /// Per-position voxel usage across structures.
    pub position_voxel_counts: PositionVoxelCounts,
}

impl OccupancyTables {
    /// Usage of `voxel` at `position`.
    pub fn usage(&self, position: usize, voxel: VoxelIndex) -> Option<&VoxelUsage> {
        self.position_voxel_counts.get(&position)?.get(&voxel)
    }

    /// Sum of counts over all voxels at `position`.
    pub fn position_total(&self, position: usize) -> usize {
        self.position_voxel_counts
            .get(&position)
            .map(|voxels| voxels.values().map(|usage| usage.count).sum())
            .unwrap_or(0)
    }

    /// Number of structures with a voxel recorded at `position`.
    pub fn structures_at(&self, position: usize) -> usize {
        self.used_voxels
            .values()
            .filter(|track| track.labels.contains_key(&position))
            .count()
    }

    /// Number of distinct voxels used at `position`.
    pub fn distinct_voxels_at(&self, position: usize) -> usize {
        self.position_voxel_counts
            .get(&position)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Highest position seen in any structure.
    pub fn max_position(&self) -> usize {
        self.used_voxels
            .values()
            .map(|track| track.residue_count)
            .max()
            .unwrap_or(0)
    }

    /// Voxels at `position` ordered by descending count (ties by label).
    pub fn ranked_voxels(&self, position: usize) -> Vec<(VoxelIndex, usize)> {
        let mut ranked: Vec<(VoxelIndex, usize)> = self
            .position_voxel_counts
            .get(&position)
            .map(|voxels| voxels.iter().map(|(v, u)| (*v, u.count)).collect())
            .unwrap_or_default();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }
}

/// Builds [`OccupancyTables`] from voxelizations.
#[derive(Debug, Clone, Copy, Default)]
pub struct OccupancyAggregator;

impl OccupancyAggregator {
    /// Create an aggregator.
    pub fn new() -> Self {
        Self
    }

    /// Aggregate per-structure voxelizations.
    pub fn aggregate<'a, I>(&self, voxelizations: I) -> OccupancyTables
    where
        I: IntoIterator<Item = &'a StructureVoxelization>,
    {
        self.aggregate_tracks(
            voxelizations
                .into_iter()
                .map(|v| (v.structure_id.clone(), VoxelTrack::from(v))),
        )
    }

    /// Aggregate already-extracted tracks keyed by structure id.
    pub fn aggregate_tracks<I>(&self, tracks: I) -> OccupancyTables
    where
        I: IntoIterator<Item = (String, VoxelTrack)>,
    {
        let mut tables = OccupancyTables::default();

        for (structure_id, track) in tracks {
            if tables.used_voxels.contains_key(&structure_id) {
                warn!(structure = %structure_id, "duplicate structure id, keeping the first entry");
                continue;
            }
            for (&position, &voxel) in &track.labels {
                let usage = tables
                    .position_voxel_counts
                    .entry(position)
                    .or_default()
                    .entry(voxel)
                    .or_default();
                if !usage.record(&structure_id) {
                    warn!(
                        structure = %structure_id,
                        position,
                        voxel = %voxel,
                        "structure already counted for this voxel"
                    );
                }
            }
            tables.used_voxels.insert(structure_id, track);
        }

        debug!(
            structures = tables.used_voxels.len(),
            positions = tables.position_voxel_counts.len(),
            "aggregated voxel occupancy"
        );
        tables
    }
}
