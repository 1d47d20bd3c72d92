//! File access coordinator.
//!
//! [`FileAccess`] is the entry point for browsing live targets. Every call
//! makes at most two attempts, in order:
//!
//! 1. **Native**: `ls -la <path>` or `cat <path>` inside the target.
//! 2. **Helper**: provision `ctrfs-helper` into the target and run
//!    `ctrfs-helper ls|cat <path>`. Its listing output has the `ls -la` shape,
//!    so both attempts share one parser.
//!
//! A native failure only routes to the helper attempt. If the helper attempt
//! fails too, the caller gets [`Error::AllStrategiesExhausted`] carrying both
//! diagnostics.
//!
//! [`FileSource`] puts live targets ([`LiveTarget`]) and snapshots
//! ([`ArchiveIndex`]) behind the same two operations.

use std::sync::Arc;

use crate::entry::FileEntry;
use crate::error::{Error, Result};
use crate::handle::{ContainerHandle, render_command_line};
use crate::listing::parse_listing_bytes;
use crate::provision::{HelperProvisioner, SessionCache};
use crate::runtime::{CommandOutput, CommandRunner};
use crate::snapshot::ArchiveIndex;

/// Uniform read-only view of a filesystem.
pub trait FileSource: Send + Sync {
    /// List a directory.
    fn list_files(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Read a whole file.
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;
}

impl FileSource for ArchiveIndex {
    fn list_files(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.list_directory(path)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        ArchiveIndex::read_file(self, path).map(<[u8]>::to_vec)
    }
}

/// Which attempt of the fallback chain is running.
#[derive(Debug, Clone, Copy)]
enum Strategy {
    Native,
    Helper,
}

/// Coordinates native and helper access to live targets.
///
/// Cheap to clone; clones share the runner and the session cache.
#[derive(Clone)]
pub struct FileAccess {
    runner: Arc<dyn CommandRunner>,
    provisioner: HelperProvisioner,
    cache: Arc<SessionCache>,
}

impl std::fmt::Debug for FileAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAccess")
            .field("runtime", &self.runner.program())
            .field("provisioner", &self.provisioner)
            .finish_non_exhaustive()
    }
}

impl FileAccess {
    /// Create a coordinator with a fresh session cache.
    pub fn new(runner: Arc<dyn CommandRunner>, provisioner: HelperProvisioner) -> Self {
        Self::with_cache(runner, provisioner, Arc::new(SessionCache::new()))
    }

    /// Create a coordinator that shares an existing session cache.
    pub fn with_cache(
        runner: Arc<dyn CommandRunner>,
        provisioner: HelperProvisioner,
        cache: Arc<SessionCache>,
    ) -> Self {
        Self {
            runner,
            provisioner,
            cache,
        }
    }

    /// The session cache used by this coordinator.
    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Bind this coordinator to one target.
    pub fn target(&self, handle: ContainerHandle) -> LiveTarget {
        LiveTarget {
            access: self.clone(),
            handle,
        }
    }

    /// List a directory inside a live target.
    pub fn list_files(&self, handle: &ContainerHandle, path: &str) -> Result<Vec<FileEntry>> {
        self.with_fallback(handle, path, "ls", |out| {
            if out.stdout.is_empty() {
                return Err("no output".to_string());
            }
            match parse_listing_bytes(&out.stdout) {
                Ok(entries) if entries.is_empty() => {
                    Err(Error::ParseFailed(first_line(&out.stdout)).to_string())
                }
                Ok(entries) => Ok(entries),
                Err(e) => Err(e.to_string()),
            }
        })
    }

    /// Read a file inside a live target.
    ///
    /// A successful command with no output is an empty file.
    pub fn read_file(&self, handle: &ContainerHandle, path: &str) -> Result<Vec<u8>> {
        self.with_fallback(handle, path, "cat", |out| Ok(out.stdout))
    }

    /// Run the native attempt, then the helper attempt, interpreting a
    /// successful command's output with `accept`.
    fn with_fallback<T>(
        &self,
        handle: &ContainerHandle,
        path: &str,
        subcommand: &str,
        accept: impl Fn(CommandOutput) -> std::result::Result<T, String>,
    ) -> Result<T> {
        let native = match self.attempt(Strategy::Native, handle, path, subcommand, &accept) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        tracing::debug!(
            container = %handle,
            "native {} failed, trying helper: {}",
            subcommand,
            native
        );

        match self.attempt(Strategy::Helper, handle, path, subcommand, &accept) {
            Ok(value) => Ok(value),
            Err(helper) => {
                // The helper may be gone (target restarted); inject again next time.
                self.cache.forget(handle);
                Err(Error::AllStrategiesExhausted { native, helper })
            }
        }
    }

    fn attempt<T>(
        &self,
        strategy: Strategy,
        handle: &ContainerHandle,
        path: &str,
        subcommand: &str,
        accept: &impl Fn(CommandOutput) -> std::result::Result<T, String>,
    ) -> std::result::Result<T, String> {
        let args = match strategy {
            Strategy::Native => {
                let mut parts = vec![subcommand.to_string()];
                if subcommand == "ls" {
                    parts.push("-la".to_string());
                }
                parts.push(path.to_string());
                handle.file_operation_args(parts)
            }
            Strategy::Helper => {
                let helper = self
                    .provisioner
                    .ensure_installed(self.runner.as_ref(), handle, &self.cache)
                    .map_err(|e| e.to_string())?;
                handle.file_operation_args([helper, subcommand.to_string(), path.to_string()])
            }
        };

        let out = self.runner.run(&args).map_err(|e| e.to_string())?;
        if !out.success {
            let message = out.combined_text();
            return Err(Error::CommandFailed {
                command: render_command_line(self.runner.program(), &args),
                message: if message.is_empty() {
                    "exited with failure".to_string()
                } else {
                    message
                },
            }
            .to_string());
        }
        tracing::debug!(container = %handle, ?strategy, "{} {} succeeded", subcommand, path);
        accept(out)
    }
}

fn first_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// A [`FileAccess`] bound to one live target.
#[derive(Debug, Clone)]
pub struct LiveTarget {
    access: FileAccess,
    handle: ContainerHandle,
}

impl LiveTarget {
    /// The target this source reads from.
    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }
}

impl FileSource for LiveTarget {
    fn list_files(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.access.list_files(&self.handle, path)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.access.read_file(&self.handle, path)
    }
}
