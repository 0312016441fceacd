#[path = "common/mod.rs"]
mod common;

use common::{box_grid, peptide_pdb, structure};
use groove_voxels::artifacts::ArtifactStore;
use groove_voxels::structure::StructureMetadata;
use groove_voxels::{
    ClusterParams, GridParams, RunConfig, StructureCatalog, StructureCoordinates,
    VoxelPipeline, Voxelizer,
};

fn catalog(ids: &[&str]) -> StructureCatalog {
    StructureCatalog::from_entries(ids.iter().map(|id| StructureMetadata {
        pdb_code: id.to_string(),
        locus: "hla-a".to_string(),
        allele: "HLA-A*02:01".to_string(),
        allele_slug: "hla_a_02_01".to_string(),
        peptide: "LLFGYPVYV".to_string(),
        resolution: Some(2.0),
    }))
}

#[test]
fn grid_and_voxelizations_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let grid = box_grid();

    let path = store.write_grid(&grid).unwrap();
    assert!(path.ends_with(format!("voxel_sets/{}/voxel_set.json", grid.hash())));
    let reloaded = store.read_grid(grid.hash()).unwrap();
    assert_eq!(reloaded.hash(), grid.hash());
    assert_eq!(reloaded.len(), grid.len());

    let voxelizations = Voxelizer::new(&grid).voxelize_all(&[
        structure("1aaa", &[[0.5, 0.5, 0.5]]),
        structure("2bbb", &[[1.5, 0.5, 0.5], [20.0, 0.0, 0.0]]),
    ]);
    for voxelization in voxelizations.values() {
        store.write_voxelization(voxelization).unwrap();
    }
    assert_eq!(store.read_voxelization(grid.hash(), "2bbb").unwrap(), voxelizations["2bbb"]);
    assert_eq!(store.read_voxelizations(grid.hash()).unwrap(), voxelizations);
}

#[test]
fn mismatched_grid_hash_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let grid = box_grid();
    store.write_grid(&grid).unwrap();

    let moved = store.voxel_set_dir("elsewhere");
    std::fs::create_dir_all(&moved).unwrap();
    std::fs::copy(
        store.voxel_set_dir(grid.hash()).join("voxel_set.json"),
        moved.join("voxel_set.json"),
    )
    .unwrap();
    assert!(store.read_grid("elsewhere").is_err());
}

#[test]
fn pipeline_from_pdb_text_to_cluster_files() {
    let dir = tempfile::tempdir().unwrap();
    let groove = [
        ("LEU", [1.5, 1.5, 1.5]),
        ("LEU", [2.5, 1.5, 1.5]),
        ("PHE", [3.5, 2.5, 1.5]),
        ("GLY", [4.5, 2.5, 2.5]),
    ];
    let mut ids = Vec::new();
    let mut structures = Vec::new();
    for (idx, shift) in [0.0, 0.0, 0.0, 0.0, 5.0, 5.0, 5.0].iter().enumerate() {
        let id = format!("{}xyz", idx + 1);
        let residues: Vec<(&str, [f64; 3])> = groove
            .iter()
            .map(|(name, [x, y, z])| (*name, [*x, *y + shift, *z + shift]))
            .collect();
        structures
            .push(StructureCoordinates::from_pdb_str(&id, &peptide_pdb(&residues), "CA").unwrap());
        ids.push(id);
    }
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let catalog = catalog(&id_refs);

    let params = ClusterParams::new(vec![2, 3, 4], 3);
    let config = RunConfig::default()
        .with_grid(GridParams::new([5.0, 5.0, 5.0], [10.0, 10.0, 10.0], 1.0))
        .with_clustering(params.clone())
        .with_output_dir(dir.path());
    let output = VoxelPipeline::new(config).unwrap().run(&structures, &catalog).unwrap();

    assert_eq!(output.summary.clusters, 2);
    assert_eq!(output.summary.outliers, 0);
    assert!(output.summary.out_of_bounds.is_empty());

    let store = ArtifactStore::new(dir.path());
    let hash = output.grid.hash();
    store.write_occupancy(hash, &output.occupancy).unwrap();
    store.write_clusters(hash, &params, &output.assignment).unwrap();
    store.write_summary(hash, &params, &output.report).unwrap();

    let used = store.read_used_voxels(hash).unwrap();
    assert_eq!(used, output.occupancy.used_voxels);

    let clusters = store.read_clusters(hash, &params).unwrap();
    assert_eq!(clusters.positions, vec![2, 3, 4]);
    assert_eq!(clusters.min_cluster_size, 3);
    let sizes: Vec<usize> = clusters.clusters.values().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 3]);

    let summary = store.read_summary(hash, &params).unwrap();
    assert_eq!(summary.report, output.report);
    assert_eq!(
        summary.report.allele_clusters["HLA-A*02:01"].len(),
        2,
        "one allele spread across both clusters"
    );
}
