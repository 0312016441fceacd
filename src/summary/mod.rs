//! Per-cluster statistics: membership, allele mix and voxel diversity.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cluster::ClusterAssignment;
use crate::occupancy::VoxelTrack;
use crate::structure::StructureCatalog;

/// Errors raised while summarising clusters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SummaryError {
    /// No allele is known for a clustered structure.
    #[error("no allele recorded for structure {structure_id}")]
    MissingReference {
        /// Structure identifier.
        structure_id: String,
    },
}

/// Source of allele names keyed by structure id.
pub trait AlleleLookup {
    /// Allele of `structure_id`, if known.
    fn allele_of(&self, structure_id: &str) -> Option<&str>;
}

impl AlleleLookup for StructureCatalog {
    fn allele_of(&self, structure_id: &str) -> Option<&str> {
        self.allele(structure_id)
    }
}

impl AlleleLookup for BTreeMap<String, String> {
    fn allele_of(&self, structure_id: &str) -> Option<&str> {
        self.get(structure_id).map(String::as_str)
    }
}

/// Statistics of a real (non-outlier) cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatistics {
    /// Allele → number of members.
    pub alleles: BTreeMap<String, usize>,
    /// Position → number of distinct voxels used by members.
    pub position_diversity: BTreeMap<usize, usize>,
}

/// Summary of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Cluster id; `0` holds the outliers.
    pub cluster_id: usize,
    /// Member structure ids in row order.
    pub members: Vec<String>,
    /// Number of members.
    pub member_count: usize,
    /// Statistics, absent for the outlier group.
    pub statistics: Option<ClusterStatistics>,
}

/// Summaries of every cluster in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterReport {
    /// One entry per cluster id, ascending.
    pub summaries: Vec<ClusterSummary>,
    /// Allele → ids of the real clusters it occurs in.
    pub allele_clusters: BTreeMap<String, BTreeSet<usize>>,
    /// Clustered structures without a known allele.
    pub missing_references: Vec<String>,
}

impl ClusterReport {
    /// Summary of one cluster.
    pub fn summary(&self, cluster_id: usize) -> Option<&ClusterSummary> {
        self.summaries
            .iter()
            .find(|summary| summary.cluster_id == cluster_id)
    }

    /// Number of real clusters.
    pub fn cluster_count(&self) -> usize {
        self.summaries
            .iter()
            .filter(|summary| summary.cluster_id != 0)
            .count()
    }

    /// Number of outliers.
    pub fn outlier_count(&self) -> usize {
        self.summary(0).map(|s| s.member_count).unwrap_or(0)
    }
}

impl fmt::Display for ClusterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} clusters and {} outliers",
            self.cluster_count(),
            self.outlier_count()
        )?;
        for summary in &self.summaries {
            writeln!(
                f,
                "\nCluster {}: {} members",
                summary.cluster_id, summary.member_count
            )?;
            let Some(stats) = &summary.statistics else {
                continue;
            };
            writeln!(f, "  members: {}", summary.members.join(", "))?;
            for (allele, count) in &stats.alleles {
                writeln!(f, "  allele {allele}: {count}")?;
            }
            for (position, voxels) in &stats.position_diversity {
                writeln!(f, "  position {position}: {voxels} voxels")?;
            }
        }
        if !self.allele_clusters.is_empty() {
            writeln!(f, "\nAllele cluster distribution:")?;
            for (allele, clusters) in &self.allele_clusters {
                let ids: Vec<String> = clusters.iter().map(ToString::to_string).collect();
                writeln!(
                    f,
                    "  {allele}: {} clusters [{}]",
                    clusters.len(),
                    ids.join(", ")
                )?;
            }
        }
        if !self.missing_references.is_empty() {
            writeln!(
                f,
                "\nNo allele for: {}",
                self.missing_references.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Groups clustered structures and computes per-cluster statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterSummarizer;

impl ClusterSummarizer {
    /// Create a summarizer.
    pub fn new() -> Self {
        Self
    }

    /// Allele of a structure, or a [`SummaryError::MissingReference`].
    pub fn allele<'a, L: AlleleLookup + ?Sized>(
        &self,
        lookup: &'a L,
        structure_id: &str,
    ) -> Result<&'a str, SummaryError> {
        lookup
            .allele_of(structure_id)
            .ok_or_else(|| SummaryError::MissingReference {
                structure_id: structure_id.to_string(),
            })
    }

    /// Summarise an assignment.
    ///
    /// Diversity is reported for positions `1..=max`, where `max` is the
    /// largest residue count in `used_voxels`. A member without an allele
    /// still counts towards membership and diversity but is left out of
    /// the allele statistics and listed in
    /// [`ClusterReport::missing_references`].
    pub fn summarize<L: AlleleLookup + ?Sized>(
        &self,
        assignment: &ClusterAssignment,
        lookup: &L,
        used_voxels: &BTreeMap<String, VoxelTrack>,
    ) -> ClusterReport {
        let max_position = used_voxels
            .values()
            .map(|track| track.residue_count)
            .max()
            .unwrap_or(0);

        let mut report = ClusterReport::default();
        for (cluster_id, members) in assignment.clusters() {
            let statistics = (cluster_id != 0).then(|| {
                let mut stats = ClusterStatistics::default();
                let mut voxels: BTreeMap<usize, BTreeSet<_>> =
                    (1..=max_position).map(|p| (p, BTreeSet::new())).collect();

                for member in &members {
                    match self.allele(lookup, member) {
                        Ok(allele) => {
                            *stats.alleles.entry(allele.to_string()).or_insert(0) += 1;
                            report
                                .allele_clusters
                                .entry(allele.to_string())
                                .or_default()
                                .insert(cluster_id);
                        }
                        Err(err) => {
                            warn!(error = %err, "skipping allele statistics for structure");
                            report.missing_references.push(member.clone());
                        }
                    }
                    if let Some(track) = used_voxels.get(member) {
                        for (position, voxel) in &track.labels {
                            voxels.entry(*position).or_default().insert(*voxel);
                        }
                    }
                }

                stats.position_diversity = voxels
                    .into_iter()
                    .map(|(position, set)| (position, set.len()))
                    .collect();
                stats
            });

            report.summaries.push(ClusterSummary {
                cluster_id,
                member_count: members.len(),
                members,
                statistics,
            });
        }

        debug!(
            clusters = report.cluster_count(),
            alleles = report.allele_clusters.len(),
            missing = report.missing_references.len(),
            "summarised clusters"
        );
        report
    }
}
