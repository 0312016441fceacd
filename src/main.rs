use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use groove_voxels::artifacts::ArtifactStore;
use groove_voxels::{
    ClusterEngine, ClusterSummarizer, OccupancyAggregator, RunConfig, StructureCatalog,
    StructureCoordinates, VoxelPipeline, Voxelizer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "groove-voxels",
    about = "Voxel occupancy and clustering of MHC class I peptide conformations"
)]
struct Cli {
    /// JSON run configuration; absent fields take defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Artifact root directory (overrides the configuration).
    #[arg(long, global = true)]
    output: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct StructureInput {
    /// Structure catalogue (`{"metadata": .., "structures": {id: ..}}`).
    #[arg(long)]
    metadata: PathBuf,
    /// Directory holding `<id>_peptide.pdb` files.
    #[arg(long)]
    structures: PathBuf,
    /// Keep only the best-resolution structure per peptide-MHC pair.
    #[arg(long)]
    highest_resolution: bool,
}

#[derive(Args, Debug)]
struct ClusterOverrides {
    /// Positions to cluster on, comma separated (e.g. `4,5,6`).
    #[arg(long, value_delimiter = ',')]
    positions: Option<Vec<usize>>,
    /// Minimum cluster size.
    #[arg(long)]
    min_cluster_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the voxel grid and write its definition.
    Grid,
    /// Voxelize every catalogued structure against the grid.
    Voxelize {
        #[command(flatten)]
        input: StructureInput,
    },
    /// Build occupancy tables from written voxelizations.
    Aggregate {
        /// Grid hash; defaults to the configured grid.
        #[arg(long)]
        hash: Option<String>,
    },
    /// Cluster structures from the written used-voxel table.
    Cluster {
        /// Structure catalogue used for allele statistics.
        #[arg(long)]
        metadata: PathBuf,
        /// Grid hash; defaults to the configured grid.
        #[arg(long)]
        hash: Option<String>,
        #[command(flatten)]
        overrides: ClusterOverrides,
    },
    /// Run every stage in one go.
    Run {
        #[command(flatten)]
        input: StructureInput,
        #[command(flatten)]
        overrides: ClusterOverrides,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => RunConfig::from_json_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(output) = cli.output {
        config.output_dir = output;
    }

    match cli.command {
        Commands::Grid => run_grid(&config)?,
        Commands::Voxelize { input } => run_voxelize(&config, &input)?,
        Commands::Aggregate { hash } => run_aggregate(&config, hash)?,
        Commands::Cluster {
            metadata,
            hash,
            overrides,
        } => {
            apply_overrides(&mut config, &overrides)?;
            run_cluster(&config, &metadata, hash)?
        }
        Commands::Run { input, overrides } => {
            apply_overrides(&mut config, &overrides)?;
            run_all(&config, &input)?
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn apply_overrides(config: &mut RunConfig, overrides: &ClusterOverrides) -> Result<()> {
    if let Some(positions) = &overrides.positions {
        config.clustering.positions = positions.clone();
    }
    if let Some(min_cluster_size) = overrides.min_cluster_size {
        config.clustering.min_cluster_size = min_cluster_size;
    }
    config.validate().context("invalid clustering overrides")
}

fn run_grid(config: &RunConfig) -> Result<()> {
    let pipeline = VoxelPipeline::new(config.clone())?;
    let grid = pipeline.build_grid()?;
    let path = ArtifactStore::new(&config.output_dir).write_grid(&grid)?;
    let [nx, ny, nz] = grid.counts();
    println!("grid {}\t{} voxels ({nx} x {ny} x {nz})", grid.hash(), grid.len());
    println!("written to {}", path.display());
    Ok(())
}

fn run_voxelize(config: &RunConfig, input: &StructureInput) -> Result<()> {
    let pipeline = VoxelPipeline::new(config.clone())?;
    let grid = pipeline.build_grid()?;
    let store = ArtifactStore::new(&config.output_dir);
    store.write_grid(&grid)?;

    let (_, structures) = load_structures(config, input)?;
    let voxelizations = Voxelizer::new(&grid).voxelize_all(&structures);
    let mut incomplete = 0;
    for voxelization in voxelizations.values() {
        store.write_voxelization(voxelization)?;
        if !voxelization.is_complete() {
            incomplete += 1;
        }
    }
    println!(
        "voxelized {} structures on grid {} ({} with points outside the grid)",
        voxelizations.len(),
        grid.hash(),
        incomplete
    );
    Ok(())
}

fn run_aggregate(config: &RunConfig, hash: Option<String>) -> Result<()> {
    let hash = hash.unwrap_or_else(|| config.grid.config_hash());
    let store = ArtifactStore::new(&config.output_dir);
    let voxelizations = store.read_voxelizations(&hash)?;
    let tables = OccupancyAggregator::new().aggregate(voxelizations.values());
    store.write_occupancy(&hash, &tables)?;
    println!(
        "voxel usage for {} structures over {} positions written to {}",
        tables.used_voxels.len(),
        tables.max_position(),
        store.voxel_set_dir(&hash).display()
    );
    Ok(())
}

fn run_cluster(config: &RunConfig, metadata: &Path, hash: Option<String>) -> Result<()> {
    let hash = hash.unwrap_or_else(|| config.grid.config_hash());
    let store = ArtifactStore::new(&config.output_dir);
    let catalog = StructureCatalog::from_json_file(metadata)
        .with_context(|| format!("failed to read catalogue {}", metadata.display()))?;
    let used_voxels = store.read_used_voxels(&hash)?;
    let order: Vec<String> = used_voxels.keys().cloned().collect();

    let params = &config.clustering;
    let assignment = ClusterEngine::new(params.clone())
        .cluster(&used_voxels, &order, &params.cancellation_token())
        .context("clustering failed")?;
    let report = ClusterSummarizer::new().summarize(&assignment, &catalog, &used_voxels);

    store.write_clusters(&hash, params, &assignment)?;
    let summary_path = store.write_summary(&hash, params, &report)?;

    println!(
        "Clustering at positions {:?} with a minimum cluster size of {}:",
        params.positions, params.min_cluster_size
    );
    print!("{report}");
    println!("\nwritten to {}", summary_path.display());
    Ok(())
}

fn run_all(config: &RunConfig, input: &StructureInput) -> Result<()> {
    let pipeline = VoxelPipeline::new(config.clone())?;
    let (catalog, structures) = load_structures(config, input)?;
    let output = pipeline
        .run(&structures, &catalog)
        .context("pipeline run failed")?;

    let store = ArtifactStore::new(&config.output_dir);
    let hash = output.grid.hash();
    store.write_grid(&output.grid)?;
    for voxelization in output.voxelizations.values() {
        store.write_voxelization(voxelization)?;
    }
    store.write_occupancy(hash, &output.occupancy)?;
    store.write_clusters(hash, &config.clustering, &output.assignment)?;
    store.write_summary(hash, &config.clustering, &output.report)?;

    print!("{}", output.summary);
    print!("{}", output.report);
    Ok(())
}

fn load_structures(
    config: &RunConfig,
    input: &StructureInput,
) -> Result<(StructureCatalog, Vec<StructureCoordinates>)> {
    let mut catalog = StructureCatalog::from_json_file(&input.metadata)
        .with_context(|| format!("failed to read catalogue {}", input.metadata.display()))?;
    if input.highest_resolution {
        catalog = catalog.only_highest_resolution();
    }

    let mut structures = Vec::with_capacity(catalog.len());
    for structure_id in catalog.structure_ids() {
        let path = input.structures.join(format!("{structure_id}_peptide.pdb"));
        if !path.exists() {
            warn!(structure = %structure_id, path = %path.display(), "structure file missing, skipped");
            continue;
        }
        let coordinates =
            StructureCoordinates::from_pdb_file(&structure_id, &path, &config.reference_atom)
                .with_context(|| format!("failed to read {}", path.display()))?;
        structures.push(coordinates);
    }
    info!(
        catalogued = catalog.len(),
        loaded = structures.len(),
        "structures loaded"
    );
    Ok((catalog, structures))
}
