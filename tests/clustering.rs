#[path = "common/mod.rs"]
mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use common::track;
use groove_voxels::cluster::NOISE;
use groove_voxels::{
    CancellationToken, ClusterEngine, ClusterError, ClusterParams, Hdbscan, VoxelIndex,
    VoxelTrack,
};
use proptest::prelude::*;

/// Gaps between consecutive group centres are all different, so the merge
/// order of the groups is unambiguous.
const CENTRES: [f64; 4] = [0.0, 10.0, 30.0, 70.0];

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn three_identical_structures_and_one_outlier() {
    let shared = [(10, 4, 6), (11, 5, 6), (12, 5, 7)];
    let used: BTreeMap<String, VoxelTrack> = [
        ("1aaa", track(&shared)),
        ("1bbb", track(&shared)),
        ("1ccc", track(&shared)),
        ("1ddd", track(&[(2, 15, 1), (30, 0, 18), (25, 19, 3)])),
    ]
    .into_iter()
    .map(|(id, t)| (id.to_string(), t))
    .collect();

    let engine = ClusterEngine::new(ClusterParams::new(vec![1, 2, 3], 3));
    let assignment = engine
        .cluster(
            &used,
            &ids(&["1aaa", "1bbb", "1ccc", "1ddd"]),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(assignment.labels, vec![1, 1, 1, 0]);
    let clusters = assignment.clusters();
    assert_eq!(clusters[&1], vec!["1aaa", "1bbb", "1ccc"]);
    assert_eq!(clusters[&0], vec!["1ddd"]);
}

#[test]
fn too_few_structures_is_fatal() {
    let used: BTreeMap<String, VoxelTrack> = [("1aaa", track(&[(0, 0, 0)]))]
        .into_iter()
        .map(|(id, t)| (id.to_string(), t))
        .collect();
    let engine = ClusterEngine::new(ClusterParams::new(vec![1], 3));
    let err = engine
        .cluster(&used, &ids(&["1aaa"]), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        ClusterError::InsufficientData {
            available: 1,
            required: 3
        }
    ));
}

#[test]
fn expired_deadline_stops_clustering() {
    let rows: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64, 0.0, 0.0]).collect();
    let token = CancellationToken::with_deadline(Duration::ZERO);
    let err = Hdbscan::new().fit(&rows, 5, &token).unwrap_err();
    assert_eq!(err, ClusterError::DeadlineExceeded);
}

#[test]
fn configured_deadline_reaches_the_token() {
    let params = ClusterParams::default().with_deadline(Duration::from_secs(3600));
    assert_eq!(params.deadline_ms, Some(3_600_000));
    assert!(params.cancellation_token().check().is_ok());
}

fn grouped_points() -> impl Strategy<Value = Vec<(usize, Vec<f64>)>> {
    (1usize..=4, proptest::collection::vec(3usize..=6, 4)).prop_flat_map(|(groups, sizes)| {
        let mut points = Vec::new();
        for group in 0..groups {
            for _ in 0..sizes[group] {
                points.push((group, vec![CENTRES[group], 0.0, 0.0]));
            }
        }
        Just(points).prop_shuffle()
    })
}

fn integer_rows() -> impl Strategy<Value = (Vec<[i64; 3]>, Vec<usize>, usize)> {
    (proptest::collection::vec(proptest::array::uniform3(0i64..4), 6..20), 2usize..=4)
        .prop_flat_map(|(rows, min_cluster_size)| {
            let indices: Vec<usize> = (0..rows.len()).collect();
            (Just(rows), Just(indices).prop_shuffle(), Just(min_cluster_size))
        })
}

/// Members of each label, described by row content.
fn partition_by_content(rows: &[[i64; 3]], labels: &[i64]) -> BTreeMap<i64, Vec<[i64; 3]>> {
    let mut groups: BTreeMap<i64, Vec<[i64; 3]>> = BTreeMap::new();
    for (row, &label) in rows.iter().zip(labels) {
        groups.entry(label).or_default().push(*row);
    }
    for members in groups.values_mut() {
        members.sort();
    }
    groups
}

fn to_features(rows: &[[i64; 3]]) -> Vec<Vec<f64>> {
    rows.iter().map(|r| r.iter().map(|&c| c as f64).collect()).collect()
}

fn random_tracks() -> impl Strategy<Value = BTreeMap<String, VoxelTrack>> {
    let voxel = (0usize..4, 0usize..4, 0usize..4);
    proptest::collection::vec(proptest::collection::vec(voxel, 3), 3..30).prop_map(|all| {
        all.into_iter()
            .enumerate()
            .map(|(idx, labels)| {
                let labels = labels
                    .into_iter()
                    .map(|(x, y, z)| VoxelIndex::new(x, y, z));
                (format!("s{idx:02}"), VoxelTrack::from_labels(labels))
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn partition_is_independent_of_input_order((rows, shuffle, min_cluster_size) in integer_rows()) {
        let shuffled: Vec<[i64; 3]> = shuffle.iter().map(|&idx| rows[idx]).collect();
        let token = CancellationToken::new();
        let forward = Hdbscan::new()
            .fit(&to_features(&rows), min_cluster_size, &token)
            .expect("clustering succeeds");
        let permuted = Hdbscan::new()
            .fit(&to_features(&shuffled), min_cluster_size, &token)
            .expect("clustering succeeds");

        prop_assert_eq!(
            partition_by_content(&rows, &forward),
            partition_by_content(&shuffled, &permuted)
        );
    }

    #[test]
    fn separated_groups_are_recovered_in_any_order(points in grouped_points()) {
        let rows: Vec<Vec<f64>> = points.iter().map(|(_, row)| row.clone()).collect();
        let labels = Hdbscan::new()
            .fit(&rows, 3, &CancellationToken::new())
            .expect("clustering succeeds");

        prop_assert!(labels.iter().all(|&label| label != NOISE));
        for i in 0..points.len() {
            for j in 0..points.len() {
                prop_assert_eq!(points[i].0 == points[j].0, labels[i] == labels[j]);
            }
        }
    }

    #[test]
    fn every_eligible_structure_gets_one_label(
        used in random_tracks(),
        min_cluster_size in 2usize..=3,
    ) {
        let order: Vec<String> = used.keys().cloned().collect();
        let engine = ClusterEngine::new(ClusterParams::new(vec![1, 2, 3], min_cluster_size));
        let assignment = engine
            .cluster(&used, &order, &CancellationToken::new())
            .expect("clustering succeeds");

        prop_assert_eq!(&assignment.structure_ids, &order);
        prop_assert_eq!(assignment.labels.len(), order.len());
        prop_assert!(assignment.excluded.is_empty());

        let real: BTreeSet<usize> = assignment.labels.iter().copied().filter(|&l| l != 0).collect();
        let expected: BTreeSet<usize> = (1..=assignment.cluster_count()).collect();
        prop_assert_eq!(real, expected);

        let members: usize = assignment.clusters().values().map(Vec::len).sum();
        prop_assert_eq!(members, order.len());
    }
}
