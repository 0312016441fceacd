use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::StructureError;

/// Catalogue entry describing one structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureMetadata {
    /// PDB code, lower case.
    pub pdb_code: String,
    /// MHC locus, e.g. `hla-a`.
    #[serde(default)]
    pub locus: String,
    /// IMGT allele name, e.g. `HLA-A*02:01`.
    pub allele: String,
    /// Slugified allele, e.g. `hla_a_02_01`.
    #[serde(default)]
    pub allele_slug: String,
    /// Bound peptide sequence.
    #[serde(default)]
    pub peptide: String,
    /// Crystallographic resolution in Ångström.
    #[serde(default)]
    pub resolution: Option<f64>,
}

impl StructureMetadata {
    /// Compound peptide-MHC key: allele slug plus lower-cased peptide.
    pub fn pmhc_key(&self) -> String {
        format!("{}_{}", self.allele_slug, self.peptide.to_lowercase())
    }
}

/// Structure catalogue keyed by structure id.
///
/// Reads the `{"metadata": {...}, "structures": {id: {...}}}` layout written
/// by the structure-selection step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureCatalog {
    /// Free-form provenance of the selection (query, exclusions, counts).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Entries keyed by structure id.
    pub structures: BTreeMap<String, StructureMetadata>,
}

impl StructureCatalog {
    /// Build a catalogue from entries, keyed by their PDB code.
    pub fn from_entries(entries: impl IntoIterator<Item = StructureMetadata>) -> Self {
        Self {
            metadata: serde_json::Map::new(),
            structures: entries
                .into_iter()
                .map(|entry| (entry.pdb_code.clone(), entry))
                .collect(),
        }
    }

    /// Parse a catalogue from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, StructureError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a catalogue file.
    pub fn from_json_file(path: &Path) -> Result<Self, StructureError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Number of catalogued structures.
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    /// Whether the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Structure ids in sorted order.
    pub fn structure_ids(&self) -> Vec<String> {
        self.structures.keys().cloned().collect()
    }

    /// Entry for a structure.
    pub fn get(&self, structure_id: &str) -> Option<&StructureMetadata> {
        self.structures.get(structure_id)
    }

    /// Allele of a structure, if catalogued.
    pub fn allele(&self, structure_id: &str) -> Option<&str> {
        self.get(structure_id).map(|entry| entry.allele.as_str())
    }

    /// Keep only the best-resolution structure for each peptide-MHC pair.
    ///
    /// Entries are visited in ascending resolution (unknown resolution last,
    /// ties broken by id); the first entry seen for a pMHC key is kept.
    pub fn only_highest_resolution(&self) -> Self {
        let mut ranked: Vec<&StructureMetadata> = self.structures.values().collect();
        ranked.sort_by(|a, b| {
            let ra = a.resolution.unwrap_or(f64::INFINITY);
            let rb = b.resolution.unwrap_or(f64::INFINITY);
            ra.total_cmp(&rb).then_with(|| a.pdb_code.cmp(&b.pdb_code))
        });

        let mut used_keys = HashSet::new();
        let structures = ranked
            .into_iter()
            .filter(|entry| used_keys.insert(entry.pmhc_key()))
            .map(|entry| (entry.pdb_code.clone(), entry.clone()))
            .collect::<BTreeMap<_, _>>();

        let mut metadata = self.metadata.clone();
        metadata.insert("only_highest_resolution".into(), true.into());
        metadata.insert(
            "only_highest_resolution_count".into(),
            structures.len().into(),
        );

        Self {
            metadata,
            structures,
        }
    }
}

/// Turn an allele slug back into an IMGT allele name.
///
/// `hla_a_02_01` becomes `HLA-A*02:01`.
pub fn deslugify_allele(allele_slug: &str) -> Result<String, StructureError> {
    let parts: Vec<&str> = allele_slug.split('_').collect();
    match parts.as_slice() {
        [locus, gene, group, protein, ..]
            if [locus, gene, group, protein].iter().all(|p| !p.is_empty()) =>
        {
            Ok(format!("{locus}-{gene}*{group}:{protein}").to_uppercase())
        }
        _ => Err(StructureError::MalformedAllele(allele_slug.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(code: &str, slug: &str, peptide: &str, resolution: Option<f64>) -> StructureMetadata {
        StructureMetadata {
            pdb_code: code.to_string(),
            locus: "hla-a".to_string(),
            allele: deslugify_allele(slug).unwrap(),
            allele_slug: slug.to_string(),
            peptide: peptide.to_string(),
            resolution,
        }
    }

    #[test]
    fn parses_catalogue_layout() {
        let text = r#"{
            "metadata": {"sql_query": "select 1"},
            "structures": {
                "1hhk": {"pdb_code": "1hhk", "locus": "hla-a", "allele": "HLA-A*02:01",
                         "allele_slug": "hla_a_02_01", "peptide": "LLFGYPVYV",
                         "pmhc_key": "hla_a_02_01_llfgypvyv", "resolution": 2.5}
            }
        }"#;
        let catalog = StructureCatalog::from_json_str(text).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.allele("1hhk"), Some("HLA-A*02:01"));
        assert_eq!(catalog.get("1hhk").unwrap().pmhc_key(), "hla_a_02_01_llfgypvyv");
        assert!(catalog.allele("9xyz").is_none());
    }

    #[test]
    fn keeps_best_resolution_per_pmhc() {
        let catalog = StructureCatalog::from_entries(vec![
            entry("1aaa", "hla_a_02_01", "LLFGYPVYV", Some(2.8)),
            entry("1bbb", "hla_a_02_01", "llfgypvyv", Some(1.9)),
            entry("1ccc", "hla_b_07_02", "RPHERNGFTVL", None),
            entry("1ddd", "hla_b_07_02", "RPHERNGFTVL", Some(3.1)),
        ]);
        let filtered = catalog.only_highest_resolution();
        assert_eq!(filtered.structure_ids(), vec!["1bbb", "1ddd"]);
        assert_eq!(
            filtered.metadata.get("only_highest_resolution_count"),
            Some(&serde_json::Value::from(2))
        );
    }

    #[test]
    fn rejects_short_slugs() {
        assert!(deslugify_allele("hla_a_02").is_err());
        assert!(deslugify_allele("hla__02_01").is_err());
    }
}
