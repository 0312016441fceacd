//! JSON artifacts exchanged with the download and display tooling.
//!
//! Layout under the store root:
//!
//! ```text
//! voxel_sets/<hash>/voxel_set.json
//! voxel_sets/<hash>/<structure>.json
//! voxel_sets/<hash>/used_voxels.json
//! voxel_sets/<hash>/position_voxels.json
//! clusters/<hash>__<min_cluster_size>__<positions>.json
//! clusters/<hash>__<min_cluster_size>__<positions>__summary.json
//! ```
//!
//! Every map is ordered, so identical inputs produce identical files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::{ClusterAssignment, ClusterParams, ExcludedStructure};
use crate::grid::{GridParams, Voxel, VoxelGrid, VoxelIndex};
use crate::occupancy::{OccupancyTables, PositionVoxelCounts, VoxelTrack};
use crate::summary::ClusterReport;
use crate::voxelize::StructureVoxelization;

const VOXEL_SET_FILE: &str = "voxel_set.json";
const USED_VOXELS_FILE: &str = "used_voxels.json";
const POSITION_VOXELS_FILE: &str = "position_voxels.json";

/// Persisted grid definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDocument {
    /// Configuration hash.
    pub hash: String,
    /// Parameters the grid was built from.
    pub params: GridParams,
    /// Voxels per axis.
    pub counts: [usize; 3],
    /// First voxel label in canonical order.
    pub first_voxel: Option<VoxelIndex>,
    /// Last voxel label in canonical order.
    pub last_voxel: Option<VoxelIndex>,
    /// Every voxel in canonical order.
    pub voxels: Vec<Voxel>,
}

impl From<&VoxelGrid> for GridDocument {
    fn from(grid: &VoxelGrid) -> Self {
        Self {
            hash: grid.hash().to_string(),
            params: grid.params().clone(),
            counts: grid.counts(),
            first_voxel: grid.first_voxel().map(|v| v.index),
            last_voxel: grid.last_voxel().map(|v| v.index),
            voxels: grid.voxels().cloned().collect(),
        }
    }
}

/// Used-voxel table as persisted: one slot per position, `null` where the
/// position has no voxel.
pub type UsedVoxelsDocument = BTreeMap<String, Vec<Option<VoxelIndex>>>;

/// Persisted cluster membership and run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDocument {
    /// Hash of the grid the voxels came from.
    pub grid_hash: String,
    /// Clustering positions.
    pub positions: Vec<usize>,
    /// Minimum cluster size.
    pub min_cluster_size: usize,
    /// Cluster id → members; `0` holds the outliers.
    pub clusters: BTreeMap<usize, Vec<String>>,
    /// Structures that could not be clustered.
    pub excluded: Vec<ExcludedStructure>,
}

impl ClusterDocument {
    /// Document for an assignment made on grid `grid_hash`.
    pub fn new(grid_hash: &str, assignment: &ClusterAssignment) -> Self {
        Self {
            grid_hash: grid_hash.to_string(),
            positions: assignment.positions.clone(),
            min_cluster_size: assignment.min_cluster_size,
            clusters: assignment.clusters(),
            excluded: assignment.excluded.clone(),
        }
    }
}

/// Persisted cluster summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDocument {
    /// Hash of the grid the voxels came from.
    pub grid_hash: String,
    /// Clustering positions.
    pub positions: Vec<usize>,
    /// Minimum cluster size.
    pub min_cluster_size: usize,
    /// Summaries and allele index.
    pub report: ClusterReport,
}

/// Reads and writes pipeline artifacts under a root directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `root`; directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything derived from grid `hash`.
    pub fn voxel_set_dir(&self, hash: &str) -> PathBuf {
        self.root.join("voxel_sets").join(hash)
    }

    /// Path of a cluster result, without extension.
    pub fn cluster_stem(&self, hash: &str, params: &ClusterParams) -> PathBuf {
        self.root.join("clusters").join(format!(
            "{hash}__{}__{}",
            params.min_cluster_size,
            params.positions_key()
        ))
    }

    /// Write the grid definition.
    pub fn write_grid(&self, grid: &VoxelGrid) -> Result<PathBuf> {
        let path = self.voxel_set_dir(grid.hash()).join(VOXEL_SET_FILE);
        write_json(&path, &GridDocument::from(grid))?;
        Ok(path)
    }

    /// Rebuild the grid stored under `hash`.
    pub fn read_grid(&self, hash: &str) -> Result<VoxelGrid> {
        let path = self.voxel_set_dir(hash).join(VOXEL_SET_FILE);
        let document: GridDocument = read_json(&path)?;
        let grid = VoxelGrid::build(document.params)
            .with_context(|| format!("rebuilding grid from {}", path.display()))?;
        if grid.hash() != hash {
            bail!(
                "grid in {} hashes to {}, expected {hash}",
                path.display(),
                grid.hash()
            );
        }
        Ok(grid)
    }

    /// Write one structure's voxelization.
    pub fn write_voxelization(&self, voxelization: &StructureVoxelization) -> Result<PathBuf> {
        let path = self
            .voxel_set_dir(&voxelization.grid_hash)
            .join(format!("{}.json", voxelization.structure_id));
        write_json(&path, voxelization)?;
        Ok(path)
    }

    /// Read one structure's voxelization.
    pub fn read_voxelization(&self, hash: &str, structure_id: &str) -> Result<StructureVoxelization> {
        read_json(&self.voxel_set_dir(hash).join(format!("{structure_id}.json")))
    }

    /// Read every structure voxelization stored for grid `hash`.
    pub fn read_voxelizations(&self, hash: &str) -> Result<BTreeMap<String, StructureVoxelization>> {
        let dir = self.voxel_set_dir(hash);
        let entries =
            fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))?;

        let mut voxelizations = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".json")
                || [VOXEL_SET_FILE, USED_VOXELS_FILE, POSITION_VOXELS_FILE].contains(&name)
            {
                continue;
            }
            let voxelization: StructureVoxelization = read_json(&path)?;
            voxelizations.insert(voxelization.structure_id.clone(), voxelization);
        }
        debug!(hash, structures = voxelizations.len(), "read voxelizations");
        Ok(voxelizations)
    }

    /// Write both occupancy tables.
    pub fn write_occupancy(&self, hash: &str, tables: &OccupancyTables) -> Result<()> {
        let dir = self.voxel_set_dir(hash);
        let used: UsedVoxelsDocument = tables
            .used_voxels
            .iter()
            .map(|(id, track)| (id.clone(), track.slots()))
            .collect();
        write_json(&dir.join(USED_VOXELS_FILE), &used)?;
        write_json(&dir.join(POSITION_VOXELS_FILE), &tables.position_voxel_counts)
    }

    /// Read the used-voxel table.
    pub fn read_used_voxels(&self, hash: &str) -> Result<BTreeMap<String, VoxelTrack>> {
        let document: UsedVoxelsDocument =
            read_json(&self.voxel_set_dir(hash).join(USED_VOXELS_FILE))?;
        Ok(document
            .into_iter()
            .map(|(id, slots)| (id, VoxelTrack::from_slots(&slots)))
            .collect())
    }

    /// Read both occupancy tables.
    pub fn read_occupancy(&self, hash: &str) -> Result<OccupancyTables> {
        let position_voxel_counts: PositionVoxelCounts =
            read_json(&self.voxel_set_dir(hash).join(POSITION_VOXELS_FILE))?;
        Ok(OccupancyTables {
            used_voxels: self.read_used_voxels(hash)?,
            position_voxel_counts,
        })
    }

    /// Write cluster membership.
    pub fn write_clusters(
        &self,
        hash: &str,
        params: &ClusterParams,
        assignment: &ClusterAssignment,
    ) -> Result<PathBuf> {
        let path = self.cluster_stem(hash, params).with_extension("json");
        write_json(&path, &ClusterDocument::new(hash, assignment))?;
        Ok(path)
    }

    /// Read cluster membership.
    pub fn read_clusters(&self, hash: &str, params: &ClusterParams) -> Result<ClusterDocument> {
        read_json(&self.cluster_stem(hash, params).with_extension("json"))
    }

    /// Write cluster summaries.
    pub fn write_summary(
        &self,
        hash: &str,
        params: &ClusterParams,
        report: &ClusterReport,
    ) -> Result<PathBuf> {
        let path = summary_path(&self.cluster_stem(hash, params));
        let document = SummaryDocument {
            grid_hash: hash.to_string(),
            positions: params.positions.clone(),
            min_cluster_size: params.min_cluster_size,
            report: report.clone(),
        };
        write_json(&path, &document)?;
        Ok(path)
    }

    /// Read cluster summaries.
    pub fn read_summary(&self, hash: &str, params: &ClusterParams) -> Result<SummaryDocument> {
        read_json(&summary_path(&self.cluster_stem(hash, params)))
    }
}

fn summary_path(stem: &Path) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push("__summary.json");
    PathBuf::from(name)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let mut text = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialising {}", path.display()))?;
    text.push('\n');
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    debug!(path = %path.display(), "wrote artifact");
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
