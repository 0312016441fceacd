//! Density clustering of structures by the voxels they occupy.
//!
//! Each structure becomes a feature vector of voxel coordinates at a fixed
//! list of positions. A [`DensityClusterer`] labels the vectors and the
//! [`ClusterEngine`] maps its labels onto the reported numbering, where `0`
//! holds outliers and real clusters count up from `1`.

mod cancel;
mod features;
mod hdbscan;

pub use cancel::CancellationToken;
pub use features::{feature_row, ExcludedStructure, FeatureMatrix};
pub use hdbscan::{Hdbscan, NOISE};

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::occupancy::VoxelTrack;

/// Errors raised while clustering.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClusterError {
    /// Fewer eligible structures than the minimum cluster size.
    #[error("{available} eligible structures, at least {required} required")]
    InsufficientData {
        /// Structures with a complete feature vector.
        available: usize,
        /// Minimum cluster size.
        required: usize,
    },
    /// A feature row has the wrong width.
    #[error("row {row} has {found} features, expected {expected}")]
    DimensionMismatch {
        /// Offending row.
        row: usize,
        /// Width of the first row.
        expected: usize,
        /// Width found.
        found: usize,
    },
    /// No positions were selected for clustering.
    #[error("no clustering positions selected")]
    EmptyPositions,
    /// A clustering parameter is out of range.
    #[error("invalid clustering parameter: {0}")]
    InvalidParameter(String),
    /// A structure has no voxel at a clustering position.
    #[error("structure {structure_id} has no voxel at position {position}")]
    MissingPosition {
        /// Structure identifier.
        structure_id: String,
        /// Missing position.
        position: usize,
    },
    /// The clusterer returned a label count that differs from the row count.
    #[error("clusterer returned {found} labels for {expected} rows")]
    LabelCount {
        /// Number of rows.
        expected: usize,
        /// Number of labels.
        found: usize,
    },
    /// Cancellation was requested.
    #[error("clustering cancelled")]
    Cancelled,
    /// The clustering deadline passed.
    #[error("clustering deadline exceeded")]
    DeadlineExceeded,
}

/// Clustering parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// 1-based positions whose voxels form the feature vector, in order.
    pub positions: Vec<usize>,
    /// Smallest group reported as a cluster.
    pub min_cluster_size: usize,
    /// Neighbourhood size for density estimates; defaults to
    /// `min_cluster_size`.
    pub min_samples: Option<usize>,
    /// Whether all structures may end up in one cluster.
    pub allow_single_cluster: bool,
    /// Time limit for the clustering stage in milliseconds.
    pub deadline_ms: Option<u64>,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            positions: vec![4, 5, 6],
            min_cluster_size: 3,
            min_samples: None,
            allow_single_cluster: true,
            deadline_ms: None,
        }
    }
}

impl ClusterParams {
    /// Parameters for `positions` with the given minimum cluster size.
    pub fn new(positions: Vec<usize>, min_cluster_size: usize) -> Self {
        Self {
            positions,
            min_cluster_size,
            ..Self::default()
        }
    }

    /// Set `min_samples`.
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = Some(min_samples);
        self
    }

    /// Allow or forbid a single all-encompassing cluster.
    pub fn with_allow_single_cluster(mut self, allow: bool) -> Self {
        self.allow_single_cluster = allow;
        self
    }

    /// Bound the clustering stage in time.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.positions.is_empty() {
            return Err(ClusterError::EmptyPositions);
        }
        if self.positions.contains(&0) {
            return Err(ClusterError::InvalidParameter(
                "positions are 1-based".to_string(),
            ));
        }
        if self.min_cluster_size < 2 {
            return Err(ClusterError::InvalidParameter(format!(
                "min_cluster_size must be at least 2, got {}",
                self.min_cluster_size
            )));
        }
        if self.min_samples == Some(0) {
            return Err(ClusterError::InvalidParameter(
                "min_samples must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Positions joined with `_`, e.g. `4_5_6`.
    pub fn positions_key(&self) -> String {
        self.positions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Token honouring `deadline_ms`.
    pub fn cancellation_token(&self) -> CancellationToken {
        match self.deadline_ms {
            Some(ms) => CancellationToken::with_deadline(Duration::from_millis(ms)),
            None => CancellationToken::new(),
        }
    }
}

/// Density clustering over feature rows.
///
/// Implementations return one label per row: a negative value for noise,
/// otherwise a cluster id counting from 0.
pub trait DensityClusterer {
    /// Label every row.
    fn fit(
        &self,
        rows: &[Vec<f64>],
        min_cluster_size: usize,
        token: &CancellationToken,
    ) -> Result<Vec<i64>, ClusterError>;
}

/// Map a clusterer label to the reported numbering: noise to 0, `L` to `L + 1`.
pub fn remap_label(raw: i64) -> usize {
    if raw < 0 {
        0
    } else {
        raw as usize + 1
    }
}

/// Cluster labels for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    /// Positions used for the feature vectors.
    pub positions: Vec<usize>,
    /// Minimum cluster size used.
    pub min_cluster_size: usize,
    /// Clustered structures, in row order.
    pub structure_ids: Vec<String>,
    /// Label of each structure; `0` marks outliers.
    pub labels: Vec<usize>,
    /// Structures that could not be clustered.
    pub excluded: Vec<ExcludedStructure>,
}

impl ClusterAssignment {
    /// Cluster id → member structure ids.
    pub fn clusters(&self) -> BTreeMap<usize, Vec<String>> {
        let mut clusters: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (structure_id, &label) in self.structure_ids.iter().zip(&self.labels) {
            clusters
                .entry(label)
                .or_default()
                .push(structure_id.clone());
        }
        clusters
    }

    /// Label of one structure.
    pub fn label_of(&self, structure_id: &str) -> Option<usize> {
        self.structure_ids
            .iter()
            .position(|id| id == structure_id)
            .map(|idx| self.labels[idx])
    }

    /// Number of real clusters (outliers not counted).
    pub fn cluster_count(&self) -> usize {
        self.clusters().keys().filter(|&&label| label != 0).count()
    }

    /// Number of structures labelled as outliers.
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&label| label == 0).count()
    }
}

/// Builds feature vectors and runs a [`DensityClusterer`].
#[derive(Debug, Clone)]
pub struct ClusterEngine<C = Hdbscan> {
    params: ClusterParams,
    clusterer: C,
}

impl ClusterEngine<Hdbscan> {
    /// Engine backed by [`Hdbscan`] configured from `params`.
    pub fn new(params: ClusterParams) -> Self {
        let clusterer = Hdbscan::new()
            .with_min_samples(params.min_samples)
            .with_allow_single_cluster(params.allow_single_cluster);
        Self { params, clusterer }
    }
}

impl<C: DensityClusterer> ClusterEngine<C> {
    /// Engine with a custom clusterer.
    pub fn with_clusterer(params: ClusterParams, clusterer: C) -> Self {
        Self { params, clusterer }
    }

    /// Parameters in use.
    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    /// Cluster the structures in `structure_order`.
    ///
    /// Structures without a voxel at every clustering position are listed in
    /// [`ClusterAssignment::excluded`] and get no label.
    pub fn cluster(
        &self,
        used_voxels: &BTreeMap<String, VoxelTrack>,
        structure_order: &[String],
        token: &CancellationToken,
    ) -> Result<ClusterAssignment, ClusterError> {
        self.params.validate()?;
        let matrix = FeatureMatrix::build(&self.params.positions, used_voxels, structure_order)?;
        for excluded in matrix.excluded() {
            warn!(
                structure = %excluded.structure_id,
                missing = ?excluded.missing_positions,
                "structure lacks clustering positions, excluded"
            );
        }
        if matrix.len() < self.params.min_cluster_size {
            return Err(ClusterError::InsufficientData {
                available: matrix.len(),
                required: self.params.min_cluster_size,
            });
        }

        let raw = self
            .clusterer
            .fit(matrix.rows(), self.params.min_cluster_size, token)?;
        if raw.len() != matrix.len() {
            return Err(ClusterError::LabelCount {
                expected: matrix.len(),
                found: raw.len(),
            });
        }

        let assignment = ClusterAssignment {
            positions: self.params.positions.clone(),
            min_cluster_size: self.params.min_cluster_size,
            structure_ids: matrix.structure_ids().to_vec(),
            labels: raw.into_iter().map(remap_label).collect(),
            excluded: matrix.excluded().to_vec(),
        };
        info!(
            structures = assignment.structure_ids.len(),
            dimensions = matrix.dimensions(),
            clusters = assignment.cluster_count(),
            noise = assignment.noise_count(),
            excluded = assignment.excluded.len(),
            "clustered structures"
        );
        Ok(assignment)
    }
}
