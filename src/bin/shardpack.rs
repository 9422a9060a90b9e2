//! shardpack CLI
//!
//! List, pack, extract and verify sharded archive datasets

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shardpack::{
    Archive, ArchiveBuilder, ArchiveEntry, CancellationToken, CodecKind, EntryFailure,
    OverwritePolicy, StaleEntryPolicy,
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "shardpack")]
#[command(about = "Pack loose files into ten shards and a compact index")]
struct Args {
    /// TOML configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads for change detection
    #[arg(short = 'j', long, global = true)]
    jobs: Option<usize>,

    /// Index codec (none, lz4, zstd), overrides the configuration
    #[arg(long, global = true)]
    codec: Option<String>,

    /// Log more (-v info, -vv debug)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the entries of a dataset
    List {
        archive: PathBuf,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pack a source tree into a dataset, rewriting only what changed
    Pack {
        archive: PathBuf,
        source: PathBuf,

        /// Drop index entries whose source file no longer exists
        #[arg(long)]
        prune: bool,
    },

    /// Extract entries (all of them when no paths are given)
    Extract {
        archive: PathBuf,
        destination: PathBuf,

        /// Replace files that already exist in the destination
        #[arg(long)]
        overwrite: bool,

        /// Logical paths to extract
        paths: Vec<String>,
    },

    /// Check every payload against its recorded checksum
    Verify { archive: PathBuf },
}

#[derive(Serialize)]
struct Listing<'a> {
    count: usize,
    total_bytes: u64,
    entries: &'a [ArchiveEntry],
}

/// Builder for `dir` with the global configuration flags applied
fn archive_builder(args: &Args, dir: &Path) -> anyhow::Result<ArchiveBuilder> {
    let mut builder = ArchiveBuilder::new().dir(dir);
    if let Some(config) = &args.config {
        builder = builder
            .config_file(config)
            .with_context(|| format!("loading {}", config.display()))?;
    }
    if let Some(jobs) = args.jobs {
        builder = builder.parallelism(jobs);
    }
    if let Some(codec) = &args.codec {
        let Some(codec) = CodecKind::parse(codec) else {
            bail!("Invalid codec '{}'. Valid options: none, lz4, zstd", codec);
        };
        builder = builder.codec(codec);
    }
    Ok(builder)
}

fn open(args: &Args, dir: &Path) -> anyhow::Result<Archive> {
    Ok(archive_builder(args, dir)?.build()?)
}

fn print_failures(failures: &[EntryFailure]) {
    for failure in failures {
        eprintln!("  failed: {}: {}", failure.logical_path, failure.error);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();

    match &args.command {
        Command::List { archive, json } => {
            let archive = open(&args, archive)?;
            let entries = archive.list_entries()?;
            let total_bytes: u64 = entries.iter().map(|e| u64::from(e.size)).sum();

            if *json {
                let listing = Listing {
                    count: entries.len(),
                    total_bytes,
                    entries: &entries,
                };
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for entry in &entries {
                    println!(
                        "{:>12}  shard {}  @{:<12}  {:08x}  {}",
                        entry.size, entry.shard_id, entry.offset, entry.checksum, entry.logical_path
                    );
                }
                println!("{} entries, {} bytes", entries.len(), total_bytes);
            }
        }

        Command::Pack {
            archive,
            source,
            prune,
        } => {
            let mut builder = archive_builder(&args, archive)?;
            if *prune {
                builder = builder.stale_entries(StaleEntryPolicy::Prune);
            }
            let archive = builder.build()?;

            info!("Packing {:?} into {:?}", source, archive.dir());
            let report = archive
                .pack(
                    source,
                    |p| info!("[{}/{}] {}", p.completed, p.total, p.logical_path),
                    &cancel,
                )
                .with_context(|| format!("packing {}", source.display()))?;

            println!(
                "packed: {} succeeded, {} failed, {} unchanged, {} pruned",
                report.succeeded(),
                report.failed(),
                report.unchanged,
                report.pruned
            );
            print_failures(&report.failures);
            if report.failed() > 0 {
                std::process::exit(1);
            }
        }

        Command::Extract {
            archive,
            destination,
            overwrite,
            paths,
        } => {
            let archive = open(&args, archive)?;
            let selected = if paths.is_empty() {
                archive.list_entries()?
            } else {
                archive.select(paths.as_slice())?
            };
            let policy = if *overwrite {
                OverwritePolicy::Replace
            } else {
                archive.config().overwrite
            };

            let report = archive.extract(
                &selected,
                destination,
                policy,
                |p| info!("[{}/{}]", p.completed, p.total),
                &cancel,
            )?;

            println!(
                "extracted: {} succeeded, {} failed, {} skipped",
                report.succeeded(),
                report.failed(),
                report.skipped
            );
            print_failures(&report.failures);
            if report.failed() > 0 {
                std::process::exit(1);
            }
        }

        Command::Verify { archive } => {
            let archive = open(&args, archive)?;
            let report = archive.verify(|_| {}, &cancel)?;

            println!(
                "verified: {} succeeded, {} failed",
                report.verified,
                report.failures.len()
            );
            print_failures(&report.failures);
            if !report.failures.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
