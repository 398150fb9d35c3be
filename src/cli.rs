use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use reusecache_matrix::{MatrixBlock, ScalarValue};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CacheKey, CacheStatsSnapshot, CacheValue, IoThroughput, ReuseCache};
use crate::cache::{Lookup, SharedReuseCache};
use crate::config::{CacheConfig, EvictionPolicyConfig};
use crate::utils::logger;

#[derive(Parser, Debug)]
#[command(name = "reusecache", version, about = "Reuse cache eviction and spill simulator")]
pub struct ReuseCacheCli {
    #[arg(long, global = true)]
    /// Load cache settings from a YAML file (or TOML with the toml-config feature).
    config: Option<PathBuf>,

    #[arg(long, short, global = true)]
    /// Emit debug logs from the cache.
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

impl ReuseCacheCli {
    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs a synthetic workload against the cache and reports statistics.
    Simulate(SimulateArgs),
    /// Prints the effective configuration as YAML.
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long)]
    /// Memory budget in MB; overrides the configuration.
    pub limit_mb: Option<f64>,

    #[arg(long, default_value_t = 500)]
    /// Cache operations per worker.
    pub operations: usize,

    #[arg(long, default_value_t = 256)]
    /// Largest matrix dimension generated.
    pub max_dim: usize,

    #[arg(long, default_value_t = 0.4)]
    /// Share of operations that probe a previously produced key.
    pub reuse_ratio: f64,

    #[arg(long, default_value_t = 0.1)]
    /// Share of new results that duplicate an existing value.
    pub alias_ratio: f64,

    #[arg(long, default_value_t = 0.2)]
    /// Share of new results that are scalars.
    pub scalar_ratio: f64,

    #[arg(long, value_parser = parse_policy)]
    /// Eviction ordering: lru, cost-size or hybrid.
    pub policy: Option<EvictionPolicyConfig>,

    #[arg(long)]
    /// Delete instead of spilling.
    pub no_spill: bool,

    #[arg(long, default_value_t = 1)]
    pub threads: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long)]
    /// Print the report as JSON.
    pub json: bool,
}

fn parse_policy(value: &str) -> Result<EvictionPolicyConfig, String> {
    EvictionPolicyConfig::parse(value)
        .ok_or_else(|| format!("unknown policy `{value}` (expected lru, cost-size or hybrid)"))
}

pub fn run() -> Result<()> {
    let cli = ReuseCacheCli::parse();
    logger::init_logging(cli.verbose);
    let config = load_config(&cli)?;
    match &cli.command {
        Command::Simulate(args) => handle_simulate(config, args),
        Command::Config => {
            print!("{}", config.to_yaml().context("failed to render configuration")?);
            Ok(())
        }
    }
}

fn load_config(cli: &ReuseCacheCli) -> Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("invalid environment override")?;
    debug!(?config, "effective configuration");
    Ok(config)
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct WorkloadTally {
    pub operations: u64,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub aliases: u64,
    pub pending: u64,
}

impl WorkloadTally {
    fn merge(mut self, other: Self) -> Self {
        self.operations += other.operations;
        self.hits += other.hits;
        self.misses += other.misses;
        self.puts += other.puts;
        self.aliases += other.aliases;
        self.pending += other.pending;
        self
    }
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub policy: &'static str,
    pub limit_bytes: u64,
    pub final_size_bytes: u64,
    pub resident_entries: usize,
    pub tally: WorkloadTally,
    pub statistics: CacheStatsSnapshot,
    pub throughput: IoThroughput,
}

fn handle_simulate(mut config: CacheConfig, args: &SimulateArgs) -> Result<()> {
    for (name, ratio) in [
        ("--reuse-ratio", args.reuse_ratio),
        ("--alias-ratio", args.alias_ratio),
        ("--scalar-ratio", args.scalar_ratio),
    ] {
        if !(0.0..=1.0).contains(&ratio) {
            bail!("{name} must be between 0 and 1, got {ratio}");
        }
    }
    if args.threads == 0 || args.max_dim == 0 {
        bail!("--threads and --max-dim must be positive");
    }
    if let Some(limit_mb) = args.limit_mb {
        config.cache_limit_bytes = (limit_mb * 1024.0 * 1024.0) as u64;
    }
    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if args.no_spill {
        config.spill_enabled = false;
    }

    let report = simulate(config, args)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Runs the workload described by `args` and returns the final report.
pub fn simulate(config: CacheConfig, args: &SimulateArgs) -> Result<SimulationReport> {
    let cache = SharedReuseCache::new(ReuseCache::new(config));
    let total = (args.operations * args.threads) as u64;
    let progress = if args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(total)
    };
    progress.set_style(
        ProgressStyle::with_template("simulating [{elapsed_precise}] {wide_bar} {pos}/{len}")?
            .progress_chars("=> "),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build()
        .context("failed to start worker pool")?;
    let tallies = pool.install(|| {
        (0..args.threads)
            .into_par_iter()
            .map(|worker| run_worker(&cache, args, worker as u64, &progress))
            .collect::<Result<Vec<_>>>()
    })?;
    progress.finish_and_clear();

    let tally = tallies
        .into_iter()
        .fold(WorkloadTally::default(), WorkloadTally::merge);
    let guard = cache.lock();
    let report = SimulationReport {
        policy: guard.scorer_name(),
        limit_bytes: guard.cache_limit_bytes(),
        final_size_bytes: guard.cache_size_bytes(),
        resident_entries: guard.len(),
        tally,
        statistics: guard.statistics(),
        throughput: *guard.throughput(),
    };
    info!(operations = tally.operations, "simulation finished");
    Ok(report)
}

fn run_worker(
    cache: &SharedReuseCache,
    args: &SimulateArgs,
    worker: u64,
    progress: &ProgressBar,
) -> Result<WorkloadTally> {
    let mut rng = SplitMix64::new(args.seed ^ worker.wrapping_mul(0x9e37_79b9_7f4a_7c15));
    let mut produced: Vec<CacheKey> = Vec::new();
    let mut tally = WorkloadTally::default();

    for op in 0..args.operations {
        tally.operations += 1;
        progress.inc(1);

        if !produced.is_empty() && rng.next_f64() < args.reuse_ratio {
            let key = &produced[rng.below(produced.len())];
            match cache.get(key).with_context(|| format!("lookup of {key} failed"))? {
                Lookup::Hit(_) => tally.hits += 1,
                Lookup::Pending => tally.pending += 1,
                Lookup::Miss => tally.misses += 1,
            }
            continue;
        }

        let key = CacheKey::new((worker << 32) | op as u64, synthetic_opcode(&mut rng));
        let compute_time = Duration::from_micros(rng.between(100, 200_000));

        if !produced.is_empty() && rng.next_f64() < args.alias_ratio {
            let existing = produced[rng.below(produced.len())].clone();
            // Probe and alias under one lock so the value cannot be evicted
            // in between.
            let aliased = {
                let mut guard = cache.lock();
                let hit = guard.get(&existing)?.is_hit();
                if hit {
                    guard.insert_alias(key.clone(), &existing, compute_time)?;
                }
                hit
            };
            if aliased {
                tally.aliases += 1;
                produced.push(key);
                continue;
            }
        }

        let value = synthetic_value(&mut rng, args);
        cache
            .put(key.clone(), value, compute_time)
            .with_context(|| format!("failed to cache {key}"))?;
        tally.puts += 1;
        produced.push(key);
    }
    Ok(tally)
}

fn synthetic_opcode(rng: &mut SplitMix64) -> &'static str {
    const OPCODES: [&str; 6] = ["ba+*", "tsmm", "solve", "uak+", "rand", "cbind"];
    OPCODES[rng.below(OPCODES.len())]
}

fn synthetic_value(rng: &mut SplitMix64, args: &SimulateArgs) -> CacheValue {
    if rng.next_f64() < args.scalar_ratio {
        return CacheValue::Scalar(ScalarValue::Double(rng.next_f64()));
    }
    let rows = 1 + rng.below(args.max_dim);
    let cols = 1 + rng.below(args.max_dim);
    if rng.next_f64() < 0.3 {
        let nnz = (rows * cols / 20).max(1);
        let triplets: Vec<_> = (0..nnz)
            .map(|_| (rng.below(rows), rng.below(cols), rng.next_f64() + 0.5))
            .collect();
        if let Ok(block) = MatrixBlock::sparse_from_triplets(rows, cols, &triplets) {
            return CacheValue::matrix(block);
        }
    }
    let values = (0..rows * cols).map(|_| rng.next_f64()).collect();
    match MatrixBlock::dense(rows, cols, values) {
        Ok(block) => CacheValue::matrix(block),
        Err(_) => CacheValue::matrix(MatrixBlock::zeros(rows, cols)),
    }
}

fn print_report(report: &SimulationReport) {
    let mb = |bytes: u64| bytes as f64 / (1024.0 * 1024.0);
    let stats = &report.statistics;
    println!("{} {}", "policy".bold(), report.policy);
    println!(
        "{} {:.1} / {:.1} MB in {} entries",
        "memory".bold(),
        mb(report.final_size_bytes),
        mb(report.limit_bytes),
        report.resident_entries
    );
    println!(
        "{} {} hits ({} from disk), {} misses, {} puts, {} aliases",
        "workload".bold(),
        report.tally.hits.to_string().green(),
        stats.disk_hits,
        report.tally.misses.to_string().yellow(),
        report.tally.puts,
        report.tally.aliases
    );
    println!(
        "{} {} spilled ({:.1} ms), {} deleted, {} pinned, {} deferred",
        "eviction".bold(),
        stats.spill_writes,
        stats.write_time_ms,
        stats.mem_deletes,
        stats.pinned,
        stats.deferred_disposals
    );
    if stats.skipped_entries > 0 {
        println!(
            "{} {} queue entries skipped",
            "warning".yellow().bold(),
            stats.skipped_entries
        );
    }
    let io = &report.throughput;
    println!(
        "{} read {:.0}/{:.0} MB/s, write {:.0}/{:.0} MB/s (dense/sparse)",
        "disk".bold(),
        io.dense_read,
        io.sparse_read,
        io.dense_write,
        io.sparse_write
    );
}

/// Small deterministic generator for synthetic workloads.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }

    fn between(&mut self, low: u64, high: u64) -> u64 {
        low + self.next_u64() % (high - low)
    }
}
