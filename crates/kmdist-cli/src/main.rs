use clap::{Parser, Subcommand};
use kmdist_lib::{
    dispatch_kmer_storage, merge_partition_files, MergeConfig, PartitionLayout, PartitionResult,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "kmdist")]
#[command(version = "0.1.0")]
#[command(about = "kmdist: k-mer based dataset similarity, merge stage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the sorted count streams of one partition
    Merge {
        /// Run directory shared with the counting stage
        #[arg(short, long)]
        dir: String,

        /// Partition to merge
        #[arg(short, long)]
        partition: usize,

        /// K-mer length (odd, 3..=63)
        #[arg(short, long)]
        k: usize,

        /// Number of worker accumulators (0 = all available cores)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// Merged records per worker batch
        #[arg(long, default_value = "1000")]
        batch_capacity: usize,

        /// Minimum per-dataset abundance counted by the statistics
        #[arg(long, default_value = "0")]
        min_abundance: u32,

        /// Maximum per-dataset abundance counted by the statistics
        #[arg(long, default_value = "999999999")]
        max_abundance: u32,

        /// Also compute the complex (Chord family) distance numerators
        #[arg(long, default_value = "false")]
        complex_distances: bool,

        /// Minimum Shannon index of a k-mer's base composition, in [0, 2];
        /// low-complexity k-mers below it are dropped
        #[arg(long, default_value = "0.0")]
        min_shannon_index: f64,
    },

    /// Print a persisted partition result
    Show {
        /// Run directory
        #[arg(short, long)]
        dir: String,

        /// Partition to show
        #[arg(short, long)]
        partition: usize,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Merge {
            dir,
            partition,
            k,
            threads,
            batch_capacity,
            min_abundance,
            max_abundance,
            complex_distances,
            min_shannon_index,
        } => {
            merge_command(
                dir,
                partition,
                k,
                threads,
                batch_capacity,
                min_abundance,
                max_abundance,
                complex_distances,
                min_shannon_index,
            )?;
        }
        Commands::Show { dir, partition } => {
            show_command(dir, partition)?;
        }
    }

    Ok(())
}

/// Merge one partition and persist its statistics
#[allow(clippy::too_many_arguments)]
fn merge_command(
    dir: String,
    partition: usize,
    k: usize,
    threads: usize,
    batch_capacity: usize,
    min_abundance: u32,
    max_abundance: u32,
    complex_distances: bool,
    min_shannon_index: f64,
) -> anyhow::Result<()> {
    let layout = PartitionLayout::new(&dir);
    let dataset_ids = layout.read_dataset_ids()?;
    info!("Merging partition {} of run {}", partition, dir);
    info!("  {} datasets, k = {}", dataset_ids.len(), k);

    let config = MergeConfig {
        partition_id: partition,
        dataset_ids,
        kmer_size: k,
        num_workers: threads,
        batch_capacity,
        min_abundance,
        max_abundance,
        compute_simple_distances: true,
        compute_complex_distances: complex_distances,
        // The Chord numerators need every abundance vector, singletons
        // included; without them only shared k-mers matter downstream.
        forward_singletons: complex_distances,
        min_shannon_index,
    };

    let result = dispatch_kmer_storage!(k, K => {
        merge_partition_files::<K>(&config, &layout)?
    });

    info!(
        "Partition {} merged: {} distinct k-mers, {} shared",
        partition, result.nb_distinct_kmers, result.nb_shared_distinct_kmers
    );
    Ok(())
}

/// Load and print a persisted partition result
fn show_command(dir: String, partition: usize) -> anyhow::Result<()> {
    let layout = PartitionLayout::new(&dir);
    let path = layout.stats_path(partition);
    let result = PartitionResult::load(&path)?;
    let stats = &result.stats;
    let n = stats.nb_banks();

    println!("Partition {}", result.partition_id);
    println!("  distinct k-mers:        {}", result.nb_distinct_kmers);
    println!("  shared distinct k-mers: {}", result.nb_shared_distinct_kmers);
    println!("  completed:              {}", layout.marker_path(partition).exists());

    println!("\nPer-dataset counts:");
    for bank in 0..n {
        println!(
            "  [{}] distinct = {}, total = {}",
            bank,
            stats.distinct_kmers(bank),
            stats.total_kmers(bank)
        );
    }

    println!("\nShared distinct k-mers (i, j):");
    for i in 0..n {
        for j in (i + 1)..n {
            println!(
                "  ({}, {}) shared = {}, bray-curtis num = {}",
                i,
                j,
                stats.shared_distinct(i, j),
                stats.braycurtis_numerator(i, j)
            );
        }
    }

    Ok(())
}
