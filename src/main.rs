//! etcpress - ETC texture compression for Cocos native builds

use anyhow::{Context, Result};
use clap::Parser;
use etcpress::config::{RunConfig, DEFAULT_BUILD_DIR};
use etcpress::{logging, scan_build_dir, CacheStore, EtcPack, Profile, Scheduler, WorkerPool};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser)]
#[command(name = "etcpress")]
#[command(version)]
#[command(about = "Compress Cocos build textures to ETC with etcpack, one tool copy per CPU")]
struct Cli {
    /// Build output to convert
    #[arg(default_value = DEFAULT_BUILD_DIR)]
    build_dir: PathBuf,

    /// Compression profile
    #[arg(value_enum, default_value_t = Profile::Etc1)]
    profile: Profile,

    /// Directory holding worker/, temp/ (cache) and log/
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// etcpack directory copied into every worker (defaults to <work-dir>/mali/<platform>)
    #[arg(long)]
    tool_dir: Option<PathBuf>,

    /// Number of parallel workers (defaults to CPU thread count)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Attempts per image before giving up
    #[arg(long)]
    retries: Option<u32>,

    /// Kill etcpack runs that take longer than this
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// etcpack runs with its slot as working directory, so every path
    /// handed to it must be absolute
    fn into_config(self) -> Result<RunConfig> {
        let build_dir = std::path::absolute(&self.build_dir)
            .with_context(|| format!("Invalid build directory: {}", self.build_dir.display()))?;
        let work_dir = std::path::absolute(&self.work_dir)
            .with_context(|| format!("Invalid work directory: {}", self.work_dir.display()))?;
        let mut config = RunConfig::new(build_dir, self.profile, work_dir);

        if let Some(tool_dir) = self.tool_dir {
            config.tool_dir = std::path::absolute(&tool_dir)
                .with_context(|| format!("Invalid tool directory: {}", tool_dir.display()))?;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(retries) = self.retries {
            config.retry_ceiling = retries;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let config = cli.into_config()?;

    let _log_guard = logging::init(&config.log_dir(), verbose)?;
    config.validate()?;

    run(config).await
}

async fn run(config: RunConfig) -> Result<()> {
    let started = Instant::now();

    info!("Compressing textures in {} ({})", config.build_dir.display(), config.profile);
    info!("Workers: {}", config.workers);

    let pool = WorkerPool::provision(&config.tool_dir, &config.worker_root(), config.workers)
        .await
        .context("Failed to create workers")?;

    let scan = scan_build_dir(&config.build_dir)?;
    info!(
        "Found {} images, {} without descriptor",
        scan.items.len(),
        scan.errors.len()
    );
    for path in &scan.errors {
        info!("  missing descriptor: {}", path.display());
    }

    let temp_dir = config.temp_dir();
    let profile_dir = temp_dir.join(config.profile.name());
    std::fs::create_dir_all(&profile_dir)
        .with_context(|| format!("Failed to create {}", profile_dir.display()))?;

    let cache = CacheStore::load(&config.cache_path(), &temp_dir)?;
    let compressor = EtcPack::new(config.tool.clone(), temp_dir, config.timeout);

    let progress = ProgressBar::new(scan.items.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")?
            .progress_chars("=>-"),
    );

    let mut scheduler = Scheduler::new(compressor, pool, cache, config.profile, config.retry_ceiling)
        .with_progress(progress);
    let report = scheduler.run(scan.items).await;

    info!(
        "Finished: {} succeeded, {} failed, {} cache hits, {} skipped without descriptor",
        report.success_count,
        report.failures.len(),
        report.cache_hits,
        scan.errors.len()
    );
    for item in &report.failures {
        info!("  failed: {} ({} attempts)", item, item.retry_count);
    }

    scheduler.into_cache().persist(&config.cache_path())?;

    info!("Done in {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}
