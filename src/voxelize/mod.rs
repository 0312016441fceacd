//! Mapping of a structure's reference atoms onto grid voxels.
//!
//! Position `p` is the 1-based appearance index of a residue. Each position
//! maps to at most one voxel; positions whose atom falls outside the grid are
//! reported as [`OutOfBounds`] rather than silently dropped.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::grid::{VoxelGrid, VoxelIndex};
use crate::structure::{ResidueCoordinate, StructureCoordinates};

/// Errors raised while assigning a point to a voxel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VoxelizeError {
    /// No voxel of the grid contains the point.
    #[error("position {position} at {coordinate:?} lies outside the grid")]
    OutOfBounds {
        /// Sequence position of the residue.
        position: usize,
        /// Reference-atom coordinate.
        coordinate: [f64; 3],
    },
}

/// How points are matched to voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupStrategy {
    /// Direct index arithmetic, O(1) per point.
    #[default]
    Arithmetic,
    /// First match in canonical order, O(voxels) per point.
    LinearScan,
}

/// Voxel assignment of a single residue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidueVoxel {
    /// 1-based sequence position.
    pub position: usize,
    /// Voxel containing the reference atom.
    pub voxel: VoxelIndex,
    /// Residue name.
    pub residue: String,
    /// Reference-atom coordinate.
    pub coordinate: [f64; 3],
}

/// A residue whose reference atom fell outside the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfBounds {
    /// 1-based sequence position.
    pub position: usize,
    /// Residue name.
    pub residue: String,
    /// Reference-atom coordinate.
    pub coordinate: [f64; 3],
}

/// Voxelization of one structure against one grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureVoxelization {
    /// Structure identifier.
    pub structure_id: String,
    /// Hash of the grid configuration used.
    pub grid_hash: String,
    /// Number of residues in the input, i.e. the highest position.
    pub residue_count: usize,
    /// Assigned residues in position order.
    pub entries: Vec<ResidueVoxel>,
    /// Residues that matched no voxel, in position order.
    pub out_of_bounds: Vec<OutOfBounds>,
}

impl StructureVoxelization {
    /// Whether every residue was assigned a voxel.
    pub fn is_complete(&self) -> bool {
        self.out_of_bounds.is_empty() && self.entries.len() == self.residue_count
    }

    /// Voxel at a position, if that position was assigned.
    pub fn label_at(&self, position: usize) -> Option<VoxelIndex> {
        self.entries
            .binary_search_by_key(&position, |entry| entry.position)
            .ok()
            .map(|idx| self.entries[idx].voxel)
    }

    /// `(position, voxel)` pairs in position order.
    pub fn positioned_labels(&self) -> impl Iterator<Item = (usize, VoxelIndex)> + '_ {
        self.entries.iter().map(|entry| (entry.position, entry.voxel))
    }
}

/// Assigns reference atoms to voxels of a fixed grid.
#[derive(Debug, Clone, Copy)]
pub struct Voxelizer<'g> {
    grid: &'g VoxelGrid,
    strategy: LookupStrategy,
}

impl<'g> Voxelizer<'g> {
    /// Voxelizer using arithmetic lookup.
    pub fn new(grid: &'g VoxelGrid) -> Self {
        Self {
            grid,
            strategy: LookupStrategy::default(),
        }
    }

    /// Select the lookup strategy.
    pub fn with_strategy(mut self, strategy: LookupStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Grid this voxelizer assigns into.
    pub fn grid(&self) -> &'g VoxelGrid {
        self.grid
    }

    /// Assign one residue at `position`.
    pub fn assign(
        &self,
        position: usize,
        residue: &ResidueCoordinate,
    ) -> Result<ResidueVoxel, VoxelizeError> {
        let found = match self.strategy {
            LookupStrategy::Arithmetic => self.grid.locate(residue.coordinate),
            LookupStrategy::LinearScan => self.grid.locate_by_scan(residue.coordinate),
        };
        let voxel = found.ok_or(VoxelizeError::OutOfBounds {
            position,
            coordinate: residue.coordinate,
        })?;
        Ok(ResidueVoxel {
            position,
            voxel,
            residue: residue.residue.clone(),
            coordinate: residue.coordinate,
        })
    }

    /// Voxelize a structure, numbering residues 1..=N in input order.
    pub fn voxelize(&self, structure: &StructureCoordinates) -> StructureVoxelization {
        let mut entries = Vec::with_capacity(structure.len());
        let mut out_of_bounds = Vec::new();

        for (idx, residue) in structure.residues.iter().enumerate() {
            let position = idx + 1;
            match self.assign(position, residue) {
                Ok(entry) => entries.push(entry),
                Err(VoxelizeError::OutOfBounds { position, coordinate }) => {
                    warn!(
                        structure = %structure.structure_id,
                        position,
                        ?coordinate,
                        "reference atom outside voxel grid"
                    );
                    out_of_bounds.push(OutOfBounds {
                        position,
                        residue: residue.residue.clone(),
                        coordinate,
                    });
                }
            }
        }

        StructureVoxelization {
            structure_id: structure.structure_id.clone(),
            grid_hash: self.grid.hash().to_string(),
            residue_count: structure.len(),
            entries,
            out_of_bounds,
        }
    }

    /// Voxelize many structures in parallel, merged by structure id.
    pub fn voxelize_all(
        &self,
        structures: &[StructureCoordinates],
    ) -> BTreeMap<String, StructureVoxelization> {
        let voxelized: Vec<StructureVoxelization> = structures
            .par_iter()
            .map(|structure| self.voxelize(structure))
            .collect();

        let mut merged = BTreeMap::new();
        for voxelization in voxelized {
            let id = voxelization.structure_id.clone();
            if merged.insert(id.clone(), voxelization).is_some() {
                warn!(structure = %id, "duplicate structure id, keeping the later entry");
            }
        }
        debug!(structures = merged.len(), "voxelized structure set");
        merged
    }
}
