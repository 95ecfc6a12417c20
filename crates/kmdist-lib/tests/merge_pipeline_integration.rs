//! Integration tests for the partition merge pipeline
//!
//! These tests materialize on-disk partition count files, run the full
//! merge through [`merge_partition_files`], and check the persisted
//! result and the completion marker.

use std::fs::{self, File};
use std::io::Write;

use kmdist_lib::stream::write_records;
use kmdist_lib::{
    merge_partition_files, MergeConfig, MergeError, PartitionLayout, PartitionResult,
};
use tempfile::TempDir;

/// Set up a run directory with one partition count file per dataset
fn write_run_dir(
    dir: &TempDir,
    partition: usize,
    datasets: &[(&str, Vec<(u64, u32)>)],
) -> PartitionLayout {
    let layout = PartitionLayout::new(dir.path());

    let mut ids_file = File::create(layout.dataset_ids_path()).unwrap();
    for (name, _) in datasets {
        writeln!(ids_file, "{}", name).unwrap();
    }

    for (name, records) in datasets {
        let path = layout.count_stream_path(name, partition);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(path).unwrap();
        write_records(&mut file, records).unwrap();
    }

    layout
}

fn config(layout: &PartitionLayout, partition: usize) -> MergeConfig {
    MergeConfig {
        partition_id: partition,
        dataset_ids: layout.read_dataset_ids().unwrap(),
        kmer_size: 21,
        num_workers: 2,
        batch_capacity: 4,
        forward_singletons: true,
        ..MergeConfig::default()
    }
}

#[test]
fn test_end_to_end_two_datasets() {
    let dir = TempDir::new().unwrap();
    let layout = write_run_dir(
        &dir,
        0,
        &[
            ("sampleA", vec![(1, 5), (3, 2)]),
            ("sampleB", vec![(1, 1), (2, 4)]),
        ],
    );
    let config = config(&layout, 0);

    let result = merge_partition_files::<u64>(&config, &layout).unwrap();

    assert_eq!(result.nb_distinct_kmers, 3);
    assert_eq!(result.nb_shared_distinct_kmers, 1);
    assert_eq!(result.stats.distinct_kmers(0), 2);
    assert_eq!(result.stats.distinct_kmers(1), 2);
    assert_eq!(result.stats.total_kmers(0), 7);
    assert_eq!(result.stats.total_kmers(1), 5);
    assert_eq!(result.stats.shared_distinct(0, 1), 1);
    // Bray-Curtis numerator: min(5,1) for the one shared k-mer
    assert_eq!(result.stats.braycurtis_numerator(0, 1), 1);

    // Result file and marker, in that order, both present
    let loaded = PartitionResult::load(layout.stats_path(0)).unwrap();
    assert_eq!(loaded, result);
    assert!(layout.marker_path(0).exists());
}

#[test]
fn test_end_to_end_empty_partition() {
    let dir = TempDir::new().unwrap();
    let layout = write_run_dir(&dir, 2, &[("a", vec![]), ("b", vec![])]);
    let config = config(&layout, 2);

    let result = merge_partition_files::<u64>(&config, &layout).unwrap();

    assert_eq!(result.nb_distinct_kmers, 0);
    assert_eq!(result.nb_shared_distinct_kmers, 0);
    // An empty partition still completes and is marked done
    assert!(layout.stats_path(2).exists());
    assert!(layout.marker_path(2).exists());
}

#[test]
fn test_one_stream_outlasts_others() {
    let dir = TempDir::new().unwrap();
    let layout = write_run_dir(
        &dir,
        0,
        &[
            ("a", vec![(1, 1)]),
            ("b", vec![(2, 1)]),
            ("c", vec![(1, 1), (2, 1), (5, 1), (6, 1), (7, 1)]),
        ],
    );
    let config = config(&layout, 0);

    let result = merge_partition_files::<u64>(&config, &layout).unwrap();

    assert_eq!(result.nb_distinct_kmers, 5);
    assert_eq!(result.nb_shared_distinct_kmers, 2);
    assert_eq!(result.stats.distinct_kmers(2), 5);
    assert_eq!(result.stats.shared_distinct(0, 2), 1);
    assert_eq!(result.stats.shared_distinct(1, 2), 1);
    assert_eq!(result.stats.shared_distinct(0, 1), 0);
}

#[test]
fn test_missing_count_file_fails_and_persists_nothing() {
    let dir = TempDir::new().unwrap();
    let layout = write_run_dir(&dir, 0, &[("a", vec![(1, 1)]), ("b", vec![(2, 1)])]);
    let mut config = config(&layout, 0);
    config.dataset_ids.push("ghost".to_string());

    let result = merge_partition_files::<u64>(&config, &layout);
    assert!(result.is_err());

    assert!(!layout.stats_path(0).exists());
    assert!(!layout.marker_path(0).exists());
}

#[test]
fn test_truncated_count_file_is_stream_corrupt() {
    let dir = TempDir::new().unwrap();
    let layout = write_run_dir(&dir, 0, &[("a", vec![(1, 1)]), ("b", vec![])]);
    let config = config(&layout, 0);

    // Append a partial record to bank 1's stream
    let path = layout.count_stream_path("b", 0);
    let mut file = fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(&[0u8; 5]).unwrap();
    drop(file);

    let err = merge_partition_files::<u64>(&config, &layout).unwrap_err();
    assert!(matches!(err, MergeError::StreamCorrupt { bank: 1, .. }));
    assert!(!layout.marker_path(0).exists());
}

#[test]
fn test_abundance_threshold_applies_to_stats_only() {
    let dir = TempDir::new().unwrap();
    let layout = write_run_dir(
        &dir,
        0,
        &[
            ("a", vec![(1, 100), (2, 1)]),
            ("b", vec![(1, 3), (2, 50)]),
        ],
    );
    let mut config = config(&layout, 0);
    config.min_abundance = 2;
    config.max_abundance = 60;

    let result = merge_partition_files::<u64>(&config, &layout).unwrap();

    // Engine counters see every record regardless of the range
    assert_eq!(result.nb_distinct_kmers, 2);
    assert_eq!(result.nb_shared_distinct_kmers, 2);

    // Stats only count entries within [2, 60]: both of bank 0's entries
    // fall outside the range (100 and 1), both of bank 1's fall inside
    assert_eq!(result.stats.distinct_kmers(0), 0);
    assert_eq!(result.stats.distinct_kmers(1), 2);
    assert_eq!(result.stats.total_kmers(1), 53);
    assert_eq!(result.stats.shared_distinct(0, 1), 0);
}

#[test]
fn test_shannon_filter_drops_low_complexity_keys() {
    // Key 0 encodes a homopolymer; it must never reach the merge when the
    // entropy threshold is set. The surviving key cycles through all four
    // bases over the full 21 positions.
    let mut mixed: u64 = 0;
    for i in 0..21 {
        mixed |= ((i % 4) as u64) << (2 * i);
    }
    let dir = TempDir::new().unwrap();
    let layout = write_run_dir(
        &dir,
        0,
        &[
            ("a", vec![(0, 9), (mixed, 2)]),
            ("b", vec![(0, 4), (mixed, 1)]),
        ],
    );
    let mut config = config(&layout, 0);
    config.min_shannon_index = 1.0;

    let result = merge_partition_files::<u64>(&config, &layout).unwrap();

    assert_eq!(result.nb_distinct_kmers, 1);
    assert_eq!(result.stats.total_kmers(0), 2);
    assert_eq!(result.stats.total_kmers(1), 1);
}

#[test]
fn test_singletons_kept_out_of_stats_when_not_forwarded() {
    let dir = TempDir::new().unwrap();
    let layout = write_run_dir(
        &dir,
        0,
        &[
            ("a", vec![(1, 5), (3, 2)]),
            ("b", vec![(1, 1), (2, 4)]),
        ],
    );
    let mut config = config(&layout, 0);
    config.forward_singletons = false;

    let result = merge_partition_files::<u64>(&config, &layout).unwrap();

    // Counters include singletons, the statistics only see shared k-mers
    assert_eq!(result.nb_distinct_kmers, 3);
    assert_eq!(result.nb_shared_distinct_kmers, 1);
    assert_eq!(result.stats.total_kmers(0), 5);
    assert_eq!(result.stats.total_kmers(1), 1);
    assert_eq!(result.stats.shared_distinct(0, 1), 1);
}

#[test]
fn test_result_independent_of_workers_and_batching() {
    let datasets: Vec<(String, Vec<(u64, u32)>)> = (0..4u64)
        .map(|bank| {
            let records = (0..200u64)
                .filter(|key| key % (bank + 2) == 0)
                .map(|key| (key, (key % 11 + 1) as u32))
                .collect();
            (format!("bank{}", bank), records)
        })
        .collect();

    let mut baseline: Option<PartitionResult<_>> = None;
    for (workers, capacity) in [(1usize, 1000usize), (1, 3), (3, 7), (8, 2)] {
        let dir = TempDir::new().unwrap();
        let borrowed: Vec<(&str, Vec<(u64, u32)>)> = datasets
            .iter()
            .map(|(name, records)| (name.as_str(), records.clone()))
            .collect();
        let layout = write_run_dir(&dir, 1, &borrowed);

        let mut config = config(&layout, 1);
        config.num_workers = workers;
        config.batch_capacity = capacity;
        config.compute_complex_distances = true;

        let result = merge_partition_files::<u64>(&config, &layout).unwrap();
        match &baseline {
            None => baseline = Some(result),
            Some(expected) => {
                assert_eq!(result.stats, expected.stats, "W={} cap={}", workers, capacity);
                assert_eq!(result.nb_distinct_kmers, expected.nb_distinct_kmers);
                assert_eq!(
                    result.nb_shared_distinct_kmers,
                    expected.nb_shared_distinct_kmers
                );
            }
        }
    }
}

#[test]
fn test_progress_hint_from_count_files() {
    let dir = TempDir::new().unwrap();
    let layout = write_run_dir(
        &dir,
        1,
        &[("a", vec![(1, 1), (2, 1)]), ("b", vec![(2, 1)])],
    );

    // The counting stage's per-partition totals: line 1 is partition 1
    fs::create_dir_all(dir.path().join("kmercount_per_partition")).unwrap();
    let mut file = File::create(layout.kmer_count_path("a")).unwrap();
    writeln!(file, "0\n2").unwrap();
    let mut file = File::create(layout.kmer_count_path("b")).unwrap();
    writeln!(file, "0\n1").unwrap();

    let config = config(&layout, 1);
    let result = merge_partition_files::<u64>(&config, &layout).unwrap();
    assert_eq!(result.nb_distinct_kmers, 2);
    assert_eq!(result.nb_shared_distinct_kmers, 1);
}

#[test]
fn test_wide_keys_end_to_end() {
    // k > 31 stores keys as u128; exercise the 20-byte record path
    let big: u128 = 1 << 100;
    let dir = TempDir::new().unwrap();
    let layout = PartitionLayout::new(dir.path());

    let mut ids_file = File::create(layout.dataset_ids_path()).unwrap();
    writeln!(ids_file, "a\nb").unwrap();

    for (name, records) in [
        ("a", vec![(big, 3u32), (big + 7, 1)]),
        ("b", vec![(big, 2)]),
    ] {
        let path = layout.count_stream_path(name, 0);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(path).unwrap();
        write_records(&mut file, &records).unwrap();
    }

    let config = MergeConfig {
        dataset_ids: layout.read_dataset_ids().unwrap(),
        kmer_size: 51,
        num_workers: 2,
        batch_capacity: 4,
        forward_singletons: true,
        ..MergeConfig::default()
    };

    let result = merge_partition_files::<u128>(&config, &layout).unwrap();
    assert_eq!(result.nb_distinct_kmers, 2);
    assert_eq!(result.nb_shared_distinct_kmers, 1);
    assert_eq!(result.stats.braycurtis_numerator(0, 1), 2);
}
