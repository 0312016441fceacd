//! Run configuration shared by every pipeline stage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{ClusterError, ClusterParams};
use crate::grid::{GridError, GridParams};
use crate::structure::DEFAULT_REFERENCE_ATOM;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON for [`RunConfig`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// Grid parameters are invalid.
    #[error(transparent)]
    Grid(#[from] GridError),
    /// Clustering parameters are invalid.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    /// Any other invalid setting.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Immutable configuration of a full run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Grid geometry.
    pub grid: GridParams,
    /// Clustering parameters.
    pub clustering: ClusterParams,
    /// Root directory for artifacts.
    pub output_dir: PathBuf,
    /// Atom used as the residue's position, normally `CA`.
    pub reference_atom: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            grid: GridParams::default(),
            clustering: ClusterParams::default(),
            output_dir: PathBuf::from("output"),
            reference_atom: DEFAULT_REFERENCE_ATOM.to_string(),
        }
    }
}

impl RunConfig {
    /// Parse and validate a JSON configuration; absent fields take defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Replace the grid parameters.
    pub fn with_grid(mut self, grid: GridParams) -> Self {
        self.grid = grid;
        self
    }

    /// Replace the clustering parameters.
    pub fn with_clustering(mut self, clustering: ClusterParams) -> Self {
        self.clustering = clustering;
        self
    }

    /// Set the artifact root.
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.clustering.validate()?;
        let atom = self.reference_atom.trim();
        if atom.is_empty() || atom.len() > 4 {
            return Err(ConfigError::Invalid(format!(
                "reference atom must be 1-4 characters, got {:?}",
                self.reference_atom
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clustering.positions, vec![4, 5, 6]);
        assert_eq!(config.grid.y_offset, 8);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config = RunConfig::from_json_str(
            r#"{"clustering": {"positions": [2, 9], "min_cluster_size": 5}, "output_dir": "runs"}"#,
        )
        .unwrap();
        assert_eq!(config.clustering.positions, vec![2, 9]);
        assert_eq!(config.clustering.min_cluster_size, 5);
        assert!(config.clustering.allow_single_cluster);
        assert_eq!(config.grid, GridParams::default());
        assert_eq!(config.output_dir, PathBuf::from("runs"));
    }

    #[test]
    fn invalid_sections_are_rejected() {
        assert!(matches!(
            RunConfig::from_json_str(r#"{"grid": {"voxel_size": 0.0}}"#),
            Err(ConfigError::Grid(_))
        ));
        assert!(matches!(
            RunConfig::from_json_str(r#"{"clustering": {"min_cluster_size": 1}}"#),
            Err(ConfigError::Cluster(_))
        ));
        assert!(matches!(
            RunConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
