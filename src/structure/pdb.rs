use std::collections::HashSet;

use super::{ResidueCoordinate, StructureError};

/// Alpha carbon, one per residue.
pub const DEFAULT_REFERENCE_ATOM: &str = "CA";

/// Read one reference atom per residue from PDB `ATOM` records.
///
/// Only fixed columns are interpreted (atom name, residue name, residue
/// number and insertion code, coordinates). The first record seen for a
/// residue wins, so alternate locations after the first are dropped. Reading
/// stops at the end of the first model.
pub fn read_reference_atoms(
    pdb_text: &str,
    reference_atom: &str,
) -> Result<Vec<ResidueCoordinate>, StructureError> {
    let mut seen = HashSet::new();
    let mut residues = Vec::new();

    for (line_idx, line) in pdb_text.lines().enumerate() {
        let line_no = line_idx + 1;
        if line.starts_with("ENDMDL") {
            break;
        }
        if !line.starts_with("ATOM") {
            continue;
        }
        if column(line, 12, 16).map(str::trim) != Some(reference_atom) {
            continue;
        }

        let residue_number = column(line, 22, 27)
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .ok_or_else(|| malformed(line_no, "missing residue number"))?
            .to_string();
        if !seen.insert(residue_number) {
            continue;
        }

        let residue = column(line, 17, 20)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let coordinate = [
            parse_coordinate(line, 30, 38, line_no, "x")?,
            parse_coordinate(line, 38, 46, line_no, "y")?,
            parse_coordinate(line, 46, 54, line_no, "z")?,
        ];

        residues.push(ResidueCoordinate::new(residue, coordinate));
    }

    Ok(residues)
}

fn column(line: &str, start: usize, end: usize) -> Option<&str> {
    let end = end.min(line.len());
    line.get(start..end)
}

fn parse_coordinate(
    line: &str,
    start: usize,
    end: usize,
    line_no: usize,
    axis: &str,
) -> Result<f64, StructureError> {
    let field = column(line, start, end)
        .map(str::trim)
        .ok_or_else(|| malformed(line_no, &format!("missing {axis} coordinate")))?;
    field
        .parse::<f64>()
        .map_err(|_| malformed(line_no, &format!("invalid {axis} coordinate '{field}'")))
}

fn malformed(line: usize, reason: &str) -> StructureError {
    StructureError::MalformedRecord {
        line,
        reason: reason.to_string(),
    }
}
