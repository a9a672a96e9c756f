/// Land-cover clustering tool: loads a JSON pipeline configuration, builds
/// the optical/radar composites, trains K-Means on a pixel sample and writes
/// the cluster raster, statistics, training report and label masks.
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;
use serde::Serialize;

use landcover_core::{pipeline, PipelineConfig};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "clusterer", about = "Unsupervised land-cover clustering of Sentinel composites")]
struct Args {
    /// Pipeline configuration (JSON)
    #[arg(short, long, required_unless_present = "print_default_config")]
    config: Option<PathBuf>,

    /// Output directory (overrides `output_dir`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of clusters (overrides `kmeans.k`)
    #[arg(long)]
    k: Option<usize>,

    /// Seed for sampling and K-Means initialisation
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads (default: all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Print the default configuration as JSON and exit
    #[arg(long)]
    print_default_config: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Printed to stdout after a successful run.
#[derive(Serialize)]
struct RunSummary {
    output_dir: PathBuf,
    width: usize,
    height: usize,
    sample_size: usize,
    k: usize,
    iterations: usize,
    converged: bool,
    score: Option<f64>,
    elapsed_ms: u64,
}

fn apply_overrides(config: &mut PipelineConfig, args: &Args) {
    if let Some(dir) = &args.output {
        config.output_dir = dir.clone();
    }
    if let Some(k) = args.k {
        config.kmeans.k = k;
    }
    if let Some(seed) = args.seed {
        config.sampling.seed = seed;
        config.kmeans.seed = seed;
    }
}

#[cfg(feature = "threading")]
fn init_threads(threads: Option<usize>) -> Result<()> {
    if let Some(n) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .context("Failed to initialise thread pool")?;
        info!("Initialized thread pool with {n} threads");
    }
    Ok(())
}

#[cfg(not(feature = "threading"))]
fn init_threads(threads: Option<usize>) -> Result<()> {
    if threads.is_some() {
        log::warn!("--threads ignored: built without the `threading` feature");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    builder.format_timestamp_secs();
    builder.init();

    if args.print_default_config {
        println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
        return Ok(());
    }

    let Some(config_path) = &args.config else {
        bail!("--config is required");
    };
    let mut config = PipelineConfig::load(config_path)
        .with_context(|| format!("Cannot load configuration {}", config_path.display()))?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    init_threads(args.threads)?;

    info!("Config: {}", config_path.display());
    info!("Channels: {:?}", config.channels);
    info!("K = {}, seed = {}", config.kmeans.k, config.kmeans.seed);

    let result = pipeline::run(&config).context("Clustering pipeline failed")?;
    pipeline::write_outputs(&result, &config.output_dir)
        .with_context(|| format!("Cannot write outputs to {}", config.output_dir.display()))?;

    if let Some(ndvi) = result.statistics.channel_mean_variance("NDVI") {
        info!("Mean NDVI variance across clusters: {ndvi:.6}");
    }
    if let Some(ndwi) = result.statistics.channel_mean_variance("NDWI") {
        info!("Mean NDWI variance across clusters: {ndwi:.6}");
    }

    let summary = RunSummary {
        output_dir: config.output_dir.clone(),
        width: result.assignment.width,
        height: result.assignment.height,
        sample_size: result.sample_size,
        k: config.kmeans.k,
        iterations: result.trained.report.iterations,
        converged: result.trained.report.converged,
        score: result.statistics.score,
        elapsed_ms: result.elapsed_ms,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from(["clusterer", "--config", "run.json", "--k", "12", "--seed", "7", "-o", "out2"]);
        let mut config = PipelineConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.kmeans.k, 12);
        assert_eq!(config.kmeans.seed, 7);
        assert_eq!(config.sampling.seed, 7);
        assert_eq!(config.output_dir, PathBuf::from("out2"));
    }

    #[test]
    fn config_required_unless_printing_defaults() {
        assert!(Args::try_parse_from(["clusterer"]).is_err());
        assert!(Args::try_parse_from(["clusterer", "--print-default-config"]).is_ok());
    }
}
