#![forbid(unsafe_code)]
//! Read-only filesystem access to running containers and their snapshots.
//!
//! This library lists directories and reads files inside containers reached
//! through a container runtime CLI (`docker`, `podman`), including containers
//! nested inside another container (Docker-in-Docker), and inside archives
//! captured from them.
//!
//! # Overview
//!
//! Three data sources sit behind one contract ([`FileSource`]):
//!
//! - **Native**: `ls -la` / `cat` executed inside the target, with the listing
//!   parsed defensively ([`listing`]).
//! - **Helper**: a small static program, `ctrfs-helper`, injected into targets
//!   that ship no usable utilities ([`provision`]).
//! - **Snapshot**: a tar export indexed once in memory ([`ArchiveIndex`]).
//!
//! [`FileAccess`] tries the native strategy first and falls back to the
//! helper; if both fail the error carries both diagnostics.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ctrfs::{Config, ContainerHandle, FileAccess, HelperProvisioner, RuntimeCli};
//!
//! let config = Config::discover(None)?;
//! let runner = Arc::new(RuntimeCli::new(&config.runtime));
//! let access = FileAccess::new(runner, HelperProvisioner::new(&config));
//!
//! let target = ContainerHandle::nested("dind-host", "web");
//! for entry in access.list_files(&target, "/etc")? {
//!     println!("{:>8} {}", entry.display_size(), entry.display_name());
//! }
//! # Ok::<(), ctrfs::Error>(())
//! ```
//!
//! # Concurrency
//!
//! A call issues at most a few external commands, one after another, and
//! blocks until they finish. Run calls from worker threads to keep a UI
//! responsive; [`FileAccess`] and [`ArchiveIndex`] are `Send + Sync`. There is
//! no timeout or cancellation in this layer.
//!
//! # Command-Line Tool
//!
//! The `ctrfs` binary exposes the same operations:
//! ```bash
//! ctrfs ls web /etc --host dind-host
//! ctrfs cat web /etc/hosts
//! ctrfs snapshot capture web rootfs.tar
//! ctrfs snapshot ls rootfs.tar /usr/bin --format json
//! ```

pub mod access;
pub mod config;
pub mod entry;
pub mod error;
pub mod handle;
pub mod listing;
pub mod provision;
pub mod runtime;
pub mod snapshot;

pub use access::{FileAccess, FileSource, LiveTarget};
pub use config::Config;
pub use entry::FileEntry;
pub use error::{Error, Result};
pub use handle::ContainerHandle;
pub use provision::{Architecture, HelperProvisioner, HelperSet, SessionCache};
pub use runtime::{CommandOutput, CommandRunner, RuntimeCli};
pub use snapshot::ArchiveIndex;
