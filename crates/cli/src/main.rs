//! birdocc CLI - occupancy modelling of citizen-science bird checklists

mod stages;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use birdocc_core::PipelineConfig;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "birdocc")]
#[command(author, version, about = "Occupancy modelling of bird checklist data", long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(short, long, global = true, default_value = "birdocc.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage 1: clean raw checklists and observations
    Ingest,
    /// Stage 2: fit the observer expertise model
    Expertise,
    /// Stage 3: align terrain, climate and land-cover rasters to the reference grid
    Covariates,
    /// Stage 4: thin localities into sites and extract buffer covariates
    Thin,
    /// Stage 5: fit, select and average occupancy models per species
    Fit {
        /// Fit only these species (repeatable); overrides the configuration
        #[arg(short, long)]
        species: Vec<String>,
        /// Worker threads: 0 = all cores, 1 = sequential
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Stage 6: summary tables and figures across species
    Summarize,
    /// Run every stage in order
    Run,
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::load(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    info!("configuration: {}", path.display());
    Ok(config)
}

fn done(stage: &str, elapsed: std::time::Duration) {
    println!("{} finished", stage);
    println!("  Processing time: {:.2?}", elapsed);
}

fn print_info(input: &Path) -> Result<()> {
    let raster = stages::read_raster(input)?;
    let (rows, cols) = raster.shape();
    let bounds = raster.bounds();
    let stats = raster.statistics();

    println!("File: {}", input.display());
    println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
    println!("Cell size: {}", raster.cell_size());
    println!(
        "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
        bounds.0, bounds.1, bounds.2, bounds.3
    );
    if let Some(crs) = raster.crs() {
        println!("CRS: {}", crs);
    }
    if let Some(nodata) = raster.nodata() {
        println!("NoData: {}", nodata);
    }
    println!("\nStatistics:");
    if let Some(min) = stats.min {
        println!("  Min: {:.4}", min);
    }
    if let Some(max) = stats.max {
        println!("  Max: {:.4}", max);
    }
    if let Some(mean) = stats.mean {
        println!("  Mean: {:.4}", mean);
    }
    println!(
        "  Valid cells: {} ({:.1}%)",
        stats.valid_count,
        100.0 * stats.valid_count as f64 / raster.len().max(1) as f64
    );
    Ok(())
}

fn run_ingest(config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let report = stages::ingest(config)?;
    println!(
        "Checklists kept: {} of {} ({} detections)",
        report.kept, report.raw_checklists, report.detections
    );
    println!(
        "  Dropped: {} group duplicates, {} incomplete, {} protocol, {} outside area, {} outside dates, {} effort",
        report.group_duplicates,
        report.incomplete,
        report.protocol,
        report.outside_area,
        report.outside_dates,
        report.effort
    );
    if report.bad_times > 0 || report.bad_counts > 0 {
        println!(
            "  Unreadable: {} start times (kept), {} counts (skipped)",
            report.bad_times, report.bad_counts
        );
    }
    done("Ingest", start.elapsed());
    Ok(())
}

fn run_expertise(config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let scored = stages::expertise(config)?;
    println!("Observers scored: {}", scored);
    done("Expertise", start.elapsed());
    Ok(())
}

fn run_covariates(config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let layers = stages::covariates(config)?;
    println!("Layers written: {}", layers.join(", "));
    done("Covariates", start.elapsed());
    Ok(())
}

fn run_thin(config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let (sites, visits) = stages::thin(config)?;
    println!("Sites: {} ({} visits)", sites, visits);
    done("Thinning", start.elapsed());
    Ok(())
}

fn run_fit(config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let (fitted, failed) = stages::fit(config)?;
    println!("Species fitted: {} ({} failed)", fitted, failed);
    done("Fit", start.elapsed());
    Ok(())
}

fn run_summarize(config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let report = stages::summarize(config)?;
    println!(
        "Species summarized: {} ({} missing), {} files",
        report.fitted,
        report.missing,
        report.files.len()
    );
    done("Summary", start.elapsed());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Info { input } => print_info(&input)?,
        Commands::Ingest => run_ingest(&load_config(&cli.config)?)?,
        Commands::Expertise => run_expertise(&load_config(&cli.config)?)?,
        Commands::Covariates => run_covariates(&load_config(&cli.config)?)?,
        Commands::Thin => run_thin(&load_config(&cli.config)?)?,
        Commands::Fit { species, threads } => {
            let mut config = load_config(&cli.config)?;
            if !species.is_empty() {
                config.occupancy.species = species;
            }
            if let Some(threads) = threads {
                config.occupancy.threads = threads;
            }
            run_fit(&config)?;
        }
        Commands::Summarize => run_summarize(&load_config(&cli.config)?)?,
        Commands::Run => {
            let config = load_config(&cli.config)?;
            let start = Instant::now();
            run_ingest(&config)?;
            run_expertise(&config)?;
            run_covariates(&config)?;
            run_thin(&config)?;
            run_fit(&config)?;
            run_summarize(&config)?;
            done("Pipeline", start.elapsed());
        }
    }

    Ok(())
}
