#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use groove_voxels::{
    GridParams, ResidueCoordinate, StructureCoordinates, VoxelGrid, VoxelIndex, VoxelTrack,
};

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("GROOVE_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set GROOVE_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// 10 x 10 x 10 grid of unit voxels spanning `[0, 10)` on every axis.
pub fn box_grid() -> VoxelGrid {
    VoxelGrid::build(GridParams::new([5.0, 5.0, 5.0], [10.0, 10.0, 10.0], 1.0))
        .expect("box grid builds")
}

pub fn structure(id: &str, points: &[[f64; 3]]) -> StructureCoordinates {
    StructureCoordinates::new(
        id,
        points
            .iter()
            .map(|&p| ResidueCoordinate::new("ALA", p))
            .collect(),
    )
}

pub fn track(labels: &[(usize, usize, usize)]) -> VoxelTrack {
    VoxelTrack::from_labels(labels.iter().map(|&(x, y, z)| VoxelIndex::new(x, y, z)))
}

/// A single `ATOM` record in fixed PDB columns.
pub fn atom_record(
    serial: usize,
    name: &str,
    residue: &str,
    residue_number: i32,
    coordinate: [f64; 3],
) -> String {
    format!(
        "ATOM  {serial:>5} {name:<4} {residue:>3} C{residue_number:>4}    {:>8.3}{:>8.3}{:>8.3}  1.00 20.00           C",
        coordinate[0], coordinate[1], coordinate[2]
    )
}

/// Peptide file with a backbone N and CA per residue, numbered from 1001.
pub fn peptide_pdb(residues: &[(&str, [f64; 3])]) -> String {
    let mut lines = Vec::new();
    for (idx, (name, ca)) in residues.iter().enumerate() {
        let number = 1001 + idx as i32;
        let n = [ca[0] - 0.5, ca[1], ca[2]];
        lines.push(atom_record(2 * idx + 1, "N", name, number, n));
        lines.push(atom_record(2 * idx + 2, "CA", name, number, *ca));
    }
    lines.push("END".to_string());
    lines.join("\n")
}
