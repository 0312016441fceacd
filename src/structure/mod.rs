//! Structure inputs: reference-atom coordinates and catalogue metadata.
//!
//! Only what the voxel pipeline needs is read from a structure file: one
//! reference atom per residue, in appearance order.

mod metadata;
mod pdb;

pub use metadata::{deslugify_allele, StructureCatalog, StructureMetadata};
pub use pdb::{read_reference_atoms, DEFAULT_REFERENCE_ATOM};

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading structure inputs.
#[derive(Debug, Error)]
pub enum StructureError {
    /// A coordinate record could not be decoded.
    #[error("malformed coordinate record on line {line}: {reason}")]
    MalformedRecord {
        /// 1-based line number in the source text.
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// An allele slug did not have the `locus_gene_group_protein` form.
    #[error("malformed allele slug '{0}'")]
    MalformedAllele(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalogue JSON could not be decoded.
    #[error("invalid structure catalogue: {0}")]
    Catalog(#[from] serde_json::Error),
}

/// Reference-atom coordinate of one residue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidueCoordinate {
    /// Residue name, e.g. `LEU`.
    pub residue: String,
    /// Atom position in Ångström.
    pub coordinate: [f64; 3],
}

impl ResidueCoordinate {
    /// Construct a residue coordinate.
    pub fn new(residue: impl Into<String>, coordinate: [f64; 3]) -> Self {
        Self {
            residue: residue.into(),
            coordinate,
        }
    }
}

/// Ordered reference-atom coordinates of one structure.
///
/// Residue `i` in `residues` is sequence position `i + 1`, whatever residue
/// numbering the source file used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureCoordinates {
    /// Structure identifier (PDB code).
    pub structure_id: String,
    /// Residues in appearance order.
    pub residues: Vec<ResidueCoordinate>,
}

impl StructureCoordinates {
    /// Wrap already-ordered residues.
    pub fn new(structure_id: impl Into<String>, residues: Vec<ResidueCoordinate>) -> Self {
        Self {
            structure_id: structure_id.into(),
            residues,
        }
    }

    /// Extract reference atoms from PDB text.
    pub fn from_pdb_str(
        structure_id: impl Into<String>,
        pdb_text: &str,
        reference_atom: &str,
    ) -> Result<Self, StructureError> {
        Ok(Self::new(
            structure_id,
            read_reference_atoms(pdb_text, reference_atom)?,
        ))
    }

    /// Extract reference atoms from a PDB file on disk.
    pub fn from_pdb_file(
        structure_id: impl Into<String>,
        path: &Path,
        reference_atom: &str,
    ) -> Result<Self, StructureError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_pdb_str(structure_id, &text, reference_atom)
    }

    /// Number of residues (and therefore positions).
    pub fn len(&self) -> usize {
        self.residues.len()
    }

    /// Whether no reference atoms were found.
    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// Residue names joined by `-`, e.g. `GLY-ILE-LEU`.
    pub fn sequence(&self) -> String {
        self.residues
            .iter()
            .map(|r| r.residue.as_str())
            .collect::<Vec<_>>()
            .join("-")
    }
}
