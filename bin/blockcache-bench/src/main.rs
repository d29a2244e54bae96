//! blockcache bench - read throughput driver
//!
//! Reads a file end to end through the block cache, optionally next to
//! plain aligned direct reads, and reports per-pass timings.

use anyhow::{Context, Result, bail};
use blockcache_common::CacheConfig;
use blockcache_storage::{AlignedBuffer, BlockCache, RawFile};
use clap::Parser;
use rand::RngCore;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "blockcache-bench")]
#[command(about = "Read throughput through the blockcache page cache")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "blockcache-bench.toml")]
    config: String,

    /// File to read (created with random content if missing)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Size of the file to create, in bytes
    #[arg(long)]
    file_size: Option<u64>,

    /// Number of end-to-end passes
    #[arg(long)]
    repeat: Option<u32>,

    /// Cache page size in bytes
    #[arg(long)]
    block_size: Option<usize>,

    /// Maximum number of resident pages
    #[arg(long)]
    capacity: Option<usize>,

    /// Open files without O_DIRECT / F_NOCACHE
    #[arg(long)]
    buffered: bool,

    /// Also time plain direct reads that bypass the cache
    #[arg(long)]
    uncached: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    bench: BenchConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct BenchConfig {
    #[serde(default = "default_file")]
    file: PathBuf,
    #[serde(default = "default_file_size")]
    file_size: u64,
    #[serde(default = "default_repeat")]
    repeat: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            file: default_file(),
            file_size: default_file_size(),
            repeat: default_repeat(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_file() -> PathBuf {
    PathBuf::from("./blockcache-bench.dat")
}

fn default_file_size() -> u64 {
    64 * 1024 * 1024
}

fn default_repeat() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load config file if it exists
    let config: Config = if Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {}", e);
            Config::default()
        })
    } else {
        Config::default()
    };

    // Merge CLI args with config file (CLI takes precedence)
    let mut cache_config = config.cache;
    if let Some(block_size) = args.block_size {
        cache_config.block_size = block_size;
    }
    if let Some(capacity) = args.capacity {
        cache_config.capacity = capacity;
    }
    if args.buffered {
        cache_config.direct_io = false;
    }
    let file = args.file.unwrap_or(config.bench.file);
    let file_size = args.file_size.unwrap_or(config.bench.file_size);
    let repeat = args.repeat.unwrap_or(config.bench.repeat);
    let log_level = if args.log_level != "info" {
        args.log_level
    } else {
        config.logging.level
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cache_config
        .validate()
        .context("invalid cache configuration")?;
    if repeat == 0 {
        bail!("--repeat must be at least 1");
    }

    info!("File: {}", file.display());
    info!(
        "Block size: {} bytes, capacity: {} pages ({} MB)",
        cache_config.block_size,
        cache_config.capacity,
        cache_config.max_bytes() / 1024 / 1024
    );
    info!("Direct I/O: {}", cache_config.direct_io);

    ensure_file(&file, file_size)?;

    let mut cache = BlockCache::new(cache_config.clone())?;
    let chunk = (cache_config.block_size / 4).max(1);

    for pass in 1..=repeat {
        let (bytes, elapsed) = cached_pass(&mut cache, &file, chunk)?;
        report("cached", pass, bytes, elapsed);

        if args.uncached {
            let (bytes, elapsed) =
                uncached_pass(&file, cache_config.block_size, cache_config.direct_io)?;
            report("uncached", pass, bytes, elapsed);
        }
    }

    let stats = cache.stats().snapshot();
    println!(
        "hit ratio {:.3} ({} hits, {} misses, {} evictions)",
        cache.stats().hit_ratio(),
        stats.hits,
        stats.misses,
        stats.evictions
    );
    Ok(())
}

/// Create `path` with `size` random bytes unless it already exists
fn ensure_file(path: &Path, size: u64) -> Result<()> {
    if path.exists() {
        let existing = std::fs::metadata(path)?.len();
        if existing != size {
            warn!("Using existing file of {} bytes", existing);
        }
        return Ok(());
    }

    info!("Creating {} ({} bytes)", path.display(), size);
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
    );
    let mut rng = rand::thread_rng();
    let mut buf = vec![0u8; 1024 * 1024];
    let mut left = size;
    while left > 0 {
        let n = left.min(buf.len() as u64) as usize;
        rng.fill_bytes(&mut buf[..n]);
        out.write_all(&buf[..n])?;
        left -= n as u64;
    }
    out.flush()?;
    Ok(())
}

/// Read the whole file through the cache in `chunk`-sized reads
fn cached_pass(cache: &mut BlockCache, path: &Path, chunk: usize) -> Result<(u64, Duration)> {
    let started = Instant::now();
    let fd = cache.open(path)?;
    let mut buf = vec![0u8; chunk];
    let mut total = 0u64;
    loop {
        let n = cache.read(fd, &mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
    }
    cache.close(fd)?;
    Ok((total, started.elapsed()))
}

/// Read the whole file with one aligned transfer per block
fn uncached_pass(path: &Path, block_size: usize, direct_io: bool) -> Result<(u64, Duration)> {
    let started = Instant::now();
    let file = RawFile::open(path, direct_io)?;
    let mut buf = AlignedBuffer::new(block_size)?;
    let mut offset = 0u64;
    loop {
        let n = file.read_at(offset, buf.as_mut_slice())?;
        offset += n as u64;
        if n < block_size {
            break;
        }
    }
    Ok((offset, started.elapsed()))
}

fn report(label: &str, pass: u32, bytes: u64, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let mb_per_sec = if secs > 0.0 {
        bytes as f64 / 1024.0 / 1024.0 / secs
    } else {
        0.0
    };
    println!(
        "{label:>8} pass {pass}: {:.2} ms, {:.1} MB/s",
        secs * 1000.0,
        mb_per_sec
    );
}
