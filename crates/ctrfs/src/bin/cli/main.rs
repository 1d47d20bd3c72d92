//! ctrfs: browse files inside running containers and their snapshots
//!
//! This binary exposes the ctrfs library on the command line. Live commands
//! (`ls`, `cat`, `arch`) talk to the container runtime CLI; `--host` addresses
//! a container nested inside another container (Docker-in-Docker). `snapshot`
//! commands capture a container's filesystem to a tar file and browse it
//! offline.
//!
//! # Runtime Selection
//!
//! The runtime binary comes from, in decreasing priority: `--runtime`,
//! `$CTRFS_RUNTIME`, the `runtime` key of the configuration file, `docker`.
//!
//! # Logging
//!
//! Diagnostics go to stderr. `RUST_LOG` is honored; `--debug` shows every
//! runtime command issued.

mod output;

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ctrfs::snapshot::export_archive;
use ctrfs::*;
use output::{ArchOutput, OutputFormat, output_arch, output_entries};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "ctrfs")]
#[command(about = "Browse files inside containers and container snapshots", long_about = None)]
struct Cli {
    /// Container runtime binary (default: from configuration)
    #[arg(long, global = true)]
    runtime: Option<String>,

    /// Configuration file (default: auto-discover)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show every runtime command issued
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory inside a container
    Ls {
        /// Container ID or name
        container: String,
        /// Directory to list
        #[arg(default_value = "/")]
        path: String,
        /// Host container the target runs inside (Docker-in-Docker)
        #[arg(long)]
        host: Option<String>,
        /// Output format (table or json)
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Write a file from inside a container to stdout
    Cat {
        /// Container ID or name
        container: String,
        /// File to read
        path: String,
        /// Host container the target runs inside (Docker-in-Docker)
        #[arg(long)]
        host: Option<String>,
    },

    /// Detect the CPU architecture of a container
    Arch {
        /// Container ID or name
        container: String,
        /// Host container the target runs inside (Docker-in-Docker)
        #[arg(long)]
        host: Option<String>,
        /// Output format (table or json)
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Capture and browse filesystem snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
}

/// Snapshot subcommands
#[derive(Subcommand)]
enum SnapshotCommands {
    /// Export a container's filesystem to a tar file
    Capture {
        /// Container ID or name
        container: String,
        /// Output tar file
        output: PathBuf,
        /// Host container the target runs inside (Docker-in-Docker)
        #[arg(long)]
        host: Option<String>,
    },

    /// List a directory inside a snapshot
    Ls {
        /// Snapshot tar file
        archive: PathBuf,
        /// Directory to list
        #[arg(default_value = "/")]
        path: String,
        /// Output format (table or json)
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Write a file from a snapshot to stdout
    Cat {
        /// Snapshot tar file
        archive: PathBuf,
        /// File to read
        path: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut config = Config::discover(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(runtime) = cli.runtime {
        config.runtime = runtime;
    }

    match cli.command {
        Commands::Ls {
            container,
            path,
            host,
            format,
        } => {
            let handle = resolve_handle(&config, container, host);
            let entries = live_access(&config)
                .list_files(&handle, &path)
                .with_context(|| format!("Failed to list {} in {}", path, handle))?;
            output_entries(&entries, format).context("Failed to output listing")?;
        }
        Commands::Cat {
            container,
            path,
            host,
        } => {
            let handle = resolve_handle(&config, container, host);
            let data = live_access(&config)
                .read_file(&handle, &path)
                .with_context(|| format!("Failed to read {} in {}", path, handle))?;
            write_stdout(&data)?;
        }
        Commands::Arch {
            container,
            host,
            format,
        } => detect_arch(&config, container, host, format)?,
        Commands::Snapshot { command } => match command {
            SnapshotCommands::Capture {
                container,
                output,
                host,
            } => capture_snapshot(&config, container, host, &output)?,
            SnapshotCommands::Ls {
                archive,
                path,
                format,
            } => {
                let index = open_snapshot(&config, &archive)?;
                let entries = index
                    .list_directory(&path)
                    .with_context(|| format!("Failed to list {}", path))?;
                output_entries(&entries, format).context("Failed to output listing")?;
            }
            SnapshotCommands::Cat { archive, path } => {
                let index = open_snapshot(&config, &archive)?;
                let data = index
                    .read_file(&path)
                    .with_context(|| format!("Failed to read {}", path))?;
                write_stdout(data)?;
            }
        },
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("ctrfs=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctrfs=info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .init();
}

fn resolve_handle(config: &Config, container: String, host: Option<String>) -> ContainerHandle {
    match host {
        Some(host) => ContainerHandle::nested_with_runtime(host, container, &config.nested_runtime),
        None => ContainerHandle::direct(container),
    }
}

fn live_access(config: &Config) -> FileAccess {
    let runner = Arc::new(RuntimeCli::new(&config.runtime));
    FileAccess::new(runner, HelperProvisioner::new(config))
}

fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(data).context("Failed to write to stdout")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}

fn detect_arch(
    config: &Config,
    container: String,
    host: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let handle = resolve_handle(config, container, host);
    let runner = RuntimeCli::new(&config.runtime);
    let arch = provision::detect_architecture(&runner, &handle)
        .with_context(|| format!("Failed to detect architecture of {}", handle))?;
    let available = HelperSet::embedded().available();
    let report = ArchOutput::new(handle.to_string(), arch, &available);
    output_arch(&report, format).context("Failed to output architecture")?;
    Ok(())
}

fn capture_snapshot(
    config: &Config,
    container: String,
    host: Option<String>,
    output: &Path,
) -> Result<()> {
    let handle = resolve_handle(config, container, host);
    let runner = RuntimeCli::new(&config.runtime);
    let archive = export_archive(&runner, &handle)
        .with_context(|| format!("Failed to export {}", handle))?;

    // Index once before writing so an unreadable export never lands on disk.
    let index = match config.max_snapshot_bytes {
        Some(limit) => ArchiveIndex::build_bounded(archive.as_slice(), limit),
        None => ArchiveIndex::from_bytes(&archive),
    }
    .context("Exported filesystem is not a readable archive")?;

    std::fs::write(output, &archive)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    eprintln!(
        "Captured {} entries from {} to {}",
        index.len(),
        handle,
        output.display()
    );
    Ok(())
}

fn open_snapshot(config: &Config, archive: &Path) -> Result<ArchiveIndex> {
    let file = File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let reader = BufReader::new(file);
    let index = match config.max_snapshot_bytes {
        Some(limit) => ArchiveIndex::build_bounded(reader, limit),
        None => ArchiveIndex::build(reader),
    }
    .with_context(|| format!("Failed to index {}", archive.display()))?;
    Ok(index)
}
