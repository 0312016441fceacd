//! # Groove voxel occupancy and clustering
//!
//! Maps MHC class I peptide conformations onto a regular voxel grid laid over
//! the peptide-binding groove, tabulates which voxels each peptide position
//! visits across a structure set, and groups structures by density
//! clustering of those voxels.
//!
//! ## Stages
//!
//! 1. **Grid**: half-open voxel partition of a box around the groove
//! 2. **Voxelize**: one voxel per residue, positions numbered by appearance
//! 3. **Aggregate**: used-voxel and position-voxel occupancy tables
//! 4. **Cluster**: HDBSCAN* over voxel coordinates at chosen positions
//! 5. **Summarise**: allele mix and voxel diversity per cluster
//!
//! ## Usage Example
//!
//! ```ignore
//! use groove_voxels::{RunConfig, VoxelPipeline};
//!
//! let pipeline = VoxelPipeline::new(RunConfig::default())?;
//! let output = pipeline.run(&structures, &catalog)?;
//! println!("{}", output.report);
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod artifacts; // JSON artifact layout
pub mod cluster; // Feature vectors and density clustering
pub mod config; // Run configuration
pub mod grid; // Voxel partition
pub mod occupancy; // Cross-structure voxel usage
pub mod structure; // Coordinates and catalogue input
pub mod summary; // Per-cluster statistics
pub mod voxelize; // Point-to-voxel assignment

pub use cluster::{
    CancellationToken, ClusterAssignment, ClusterEngine, ClusterError, ClusterParams,
    DensityClusterer, ExcludedStructure, Hdbscan,
};
pub use config::{ConfigError, RunConfig};
pub use grid::{GridError, GridParams, Voxel, VoxelGrid, VoxelIndex};
pub use occupancy::{OccupancyAggregator, OccupancyTables, VoxelTrack};
pub use structure::{ResidueCoordinate, StructureCatalog, StructureCoordinates, StructureError};
pub use summary::{AlleleLookup, ClusterReport, ClusterSummarizer, ClusterSummary};
pub use voxelize::{StructureVoxelization, Voxelizer, VoxelizeError};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Errors that stop a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Grid could not be built.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// Structure input could not be read.
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// Clustering failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// A residue that fell outside the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPoint {
    /// Structure identifier.
    pub structure_id: String,
    /// 1-based position.
    pub position: usize,
    /// Reference-atom coordinate.
    pub coordinate: [f64; 3],
}

/// Recoverable problems and headline numbers of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Grid configuration hash.
    pub grid_hash: String,
    /// Structures voxelized.
    pub structures: usize,
    /// Residues assigned to a voxel.
    pub assigned_points: usize,
    /// Residues outside the grid.
    pub out_of_bounds: Vec<SkippedPoint>,
    /// Structures left out of clustering.
    pub excluded_structures: Vec<ExcludedStructure>,
    /// Clustered structures with no allele on record.
    pub missing_metadata: Vec<String>,
    /// Real clusters found.
    pub clusters: usize,
    /// Structures labelled as outliers.
    pub outliers: usize,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "grid {}", self.grid_hash)?;
        writeln!(
            f,
            "{} structures, {} points assigned, {} outside the grid",
            self.structures,
            self.assigned_points,
            self.out_of_bounds.len()
        )?;
        writeln!(
            f,
            "{} clusters, {} outliers, {} structures excluded, {} without allele",
            self.clusters,
            self.outliers,
            self.excluded_structures.len(),
            self.missing_metadata.len()
        )
    }
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Grid used.
    pub grid: VoxelGrid,
    /// Voxelization per structure id.
    pub voxelizations: BTreeMap<String, StructureVoxelization>,
    /// Occupancy tables.
    pub occupancy: OccupancyTables,
    /// Cluster labels.
    pub assignment: ClusterAssignment,
    /// Cluster summaries.
    pub report: ClusterReport,
    /// Run accounting.
    pub summary: PipelineReport,
}

/// Runs every stage with one immutable [`RunConfig`].
#[derive(Debug, Clone)]
pub struct VoxelPipeline {
    config: RunConfig,
}

impl VoxelPipeline {
    /// Validate `config` and create a pipeline.
    pub fn new(config: RunConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Build the configured grid.
    pub fn build_grid(&self) -> Result<VoxelGrid, PipelineError> {
        let grid = VoxelGrid::build(self.config.grid.clone())?;
        info!(hash = %grid.hash(), voxels = grid.len(), "grid ready");
        Ok(grid)
    }

    /// Run all stages with the configured deadline, if any.
    pub fn run<L: AlleleLookup + ?Sized>(
        &self,
        structures: &[StructureCoordinates],
        alleles: &L,
    ) -> Result<PipelineOutput, PipelineError> {
        let token = self.config.clustering.cancellation_token();
        self.run_with_token(structures, alleles, &token)
    }

    /// Run all stages, polling `token` during clustering.
    pub fn run_with_token<L: AlleleLookup + ?Sized>(
        &self,
        structures: &[StructureCoordinates],
        alleles: &L,
        token: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let grid = self.build_grid()?;
        let voxelizations = Voxelizer::new(&grid).voxelize_all(structures);
        let occupancy = OccupancyAggregator::new().aggregate(voxelizations.values());

        let order: Vec<String> = occupancy.used_voxels.keys().cloned().collect();
        let assignment = ClusterEngine::new(self.config.clustering.clone()).cluster(
            &occupancy.used_voxels,
            &order,
            token,
        )?;
        let report =
            ClusterSummarizer::new().summarize(&assignment, alleles, &occupancy.used_voxels);

        let summary = PipelineReport {
            grid_hash: grid.hash().to_string(),
            structures: voxelizations.len(),
            assigned_points: voxelizations.values().map(|v| v.entries.len()).sum(),
            out_of_bounds: voxelizations
                .values()
                .flat_map(|v| {
                    v.out_of_bounds.iter().map(move |point| SkippedPoint {
                        structure_id: v.structure_id.clone(),
                        position: point.position,
                        coordinate: point.coordinate,
                    })
                })
                .collect(),
            excluded_structures: assignment.excluded.clone(),
            missing_metadata: report.missing_references.clone(),
            clusters: assignment.cluster_count(),
            outliers: assignment.noise_count(),
        };
        info!(
            structures = summary.structures,
            clusters = summary.clusters,
            outliers = summary.outliers,
            skipped_points = summary.out_of_bounds.len(),
            "pipeline complete"
        );

        Ok(PipelineOutput {
            grid,
            voxelizations,
            occupancy,
            assignment,
            report,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig::default()
            .with_grid(GridParams::new([5.0, 5.0, 5.0], [10.0, 10.0, 10.0], 1.0))
            .with_clustering(ClusterParams::new(vec![1, 2], 3))
    }

    fn structure(id: &str, points: &[[f64; 3]]) -> StructureCoordinates {
        StructureCoordinates::new(
            id,
            points
                .iter()
                .map(|&p| ResidueCoordinate::new("GLY", p))
                .collect(),
        )
    }

    #[test]
    fn rejects_invalid_config() {
        let bad = config().with_clustering(ClusterParams::new(vec![], 3));
        assert!(matches!(
            VoxelPipeline::new(bad),
            Err(PipelineError::Config(ConfigError::Cluster(
                ClusterError::EmptyPositions
            )))
        ));
    }

    #[test]
    fn reports_skipped_points_and_excluded_structures() {
        let structures = vec![
            structure("a", &[[1.5, 1.5, 1.5], [2.5, 2.5, 2.5]]),
            structure("b", &[[1.2, 1.7, 1.1], [2.1, 2.9, 2.4]]),
            structure("c", &[[1.9, 1.0, 1.5], [2.5, 2.0, 2.2]]),
            structure("d", &[[1.5, 1.5, 1.5], [12.0, 0.0, 0.0]]),
        ];
        let alleles: BTreeMap<String, String> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| (id.to_string(), "HLA-A*02:01".to_string()))
            .collect();

        let output = VoxelPipeline::new(config())
            .unwrap()
            .run(&structures, &alleles)
            .unwrap();

        assert_eq!(output.summary.structures, 4);
        assert_eq!(output.summary.assigned_points, 7);
        assert_eq!(output.summary.out_of_bounds[0].structure_id, "d");
        assert_eq!(output.summary.excluded_structures[0].structure_id, "d");
        assert_eq!(output.assignment.labels, vec![1, 1, 1]);
        assert_eq!(output.summary.clusters, 1);
    }
}
