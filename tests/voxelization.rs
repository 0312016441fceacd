#[path = "common/mod.rs"]
mod common;

use common::{box_grid, peptide_pdb, structure};
use groove_voxels::structure::{deslugify_allele, read_reference_atoms};
use groove_voxels::voxelize::LookupStrategy;
use groove_voxels::{StructureCoordinates, VoxelIndex, Voxelizer};
use proptest::prelude::*;
use test_case::test_case;

#[test]
fn pdb_peptide_is_voxelized_by_appearance_order() {
    let text = peptide_pdb(&[
        ("GLY", [0.5, 0.5, 0.5]),
        ("ILE", [1.5, 0.5, 0.5]),
        ("LEU", [9.5, 9.5, 9.5]),
    ]);
    let peptide = StructureCoordinates::from_pdb_str("1hhk", &text, "CA").unwrap();
    assert_eq!(peptide.sequence(), "GLY-ILE-LEU");

    let grid = box_grid();
    let result = Voxelizer::new(&grid).voxelize(&peptide);
    let positions: Vec<usize> = result.entries.iter().map(|e| e.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
    assert_eq!(result.label_at(1), Some(VoxelIndex::new(0, 0, 0)));
    assert_eq!(result.label_at(2), Some(VoxelIndex::new(1, 0, 0)));
    assert_eq!(result.label_at(3), Some(VoxelIndex::new(9, 9, 9)));
    assert_eq!(result.entries[1].residue, "ILE");
}

#[test]
fn only_reference_atoms_are_kept() {
    let text = peptide_pdb(&[("GLY", [1.0, 2.0, 3.0]), ("ALA", [4.0, 5.0, 6.0])]);
    let atoms = read_reference_atoms(&text, "CA").unwrap();
    assert_eq!(atoms.len(), 2);
    assert_eq!(atoms[1].coordinate, [4.0, 5.0, 6.0]);

    let nitrogens = read_reference_atoms(&text, "N").unwrap();
    assert_eq!(nitrogens[0].coordinate, [0.5, 2.0, 3.0]);
}

#[test]
fn residue_outside_the_grid_breaks_completeness() {
    let grid = box_grid();
    let result = Voxelizer::new(&grid).voxelize(&structure(
        "2bck",
        &[[1.0, 1.0, 1.0], [10.0, 1.0, 1.0], [2.0, 2.0, 2.0]],
    ));
    assert!(!result.is_complete());
    assert_eq!(result.residue_count, 3);
    assert_eq!(result.out_of_bounds.len(), 1);
    assert_eq!(result.out_of_bounds[0].position, 2);
    assert_eq!(result.label_at(3), Some(VoxelIndex::new(2, 2, 2)));
}

#[test_case("hla_a_02_01", "HLA-A*02:01")]
#[test_case("hla_b_07_02", "HLA-B*07:02")]
#[test_case("h2_k_01_01", "H2-K*01:01")]
#[test_case("hla_c_07_02_extra", "HLA-C*07:02")]
fn allele_slugs_deslugify(slug: &str, expected: &str) {
    assert_eq!(deslugify_allele(slug).unwrap(), expected);
}

proptest! {
    #[test]
    fn complete_voxelizations_are_contiguous(
        points in proptest::collection::vec(proptest::array::uniform3(0.0f64..10.0), 1..40),
    ) {
        let grid = box_grid();
        let result = Voxelizer::new(&grid).voxelize(&structure("prop", &points));

        prop_assert!(result.is_complete());
        let positions: Vec<usize> = result.entries.iter().map(|e| e.position).collect();
        let expected: Vec<usize> = (1..=points.len()).collect();
        prop_assert_eq!(positions, expected);
    }

    #[test]
    fn lookup_strategies_agree(
        points in proptest::collection::vec(proptest::array::uniform3(-2.0f64..12.0), 1..20),
    ) {
        let grid = box_grid();
        let input = structure("prop", &points);
        let arithmetic = Voxelizer::new(&grid).voxelize(&input);
        let scan = Voxelizer::new(&grid)
            .with_strategy(LookupStrategy::LinearScan)
            .voxelize(&input);
        prop_assert_eq!(arithmetic, scan);
    }
}
