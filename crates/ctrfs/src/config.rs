//! Configuration for the access layer.
//!
//! Configuration is a small TOML file. Every key is optional:
//!
//! ```toml
//! # Runtime CLI binary on the host
//! runtime = "docker"
//!
//! # Runtime CLI inside a Docker-in-Docker host
//! nested_runtime = "docker"
//!
//! # Where the helper is placed inside targets
//! helper_install_path = "/tmp/.ctrfs-helper"
//!
//! # Intermediate directory inside a nested host
//! host_staging_dir = "/tmp"
//!
//! # Fail instead of guessing when the target architecture is unknown
//! strict_architecture = false
//!
//! # Cap on file content buffered by a snapshot
//! max_snapshot_bytes = 1073741824
//! ```
//!
//! [`Config::discover`] searches, in order:
//! - an explicit path (the CLI's `--config`)
//! - `$CTRFS_CONFIG`
//! - `$XDG_CONFIG_HOME/ctrfs/config.toml`, else `$HOME/.config/ctrfs/config.toml`
//! - `/etc/ctrfs/config.toml`
//!
//! and falls back to built-in defaults. `$CTRFS_RUNTIME` overrides `runtime`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "CTRFS_CONFIG";

/// Environment variable overriding [`Config::runtime`].
pub const RUNTIME_ENV: &str = "CTRFS_RUNTIME";

const SYSTEM_CONFIG: &str = "/etc/ctrfs/config.toml";

/// Access layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Runtime CLI binary used on the host.
    pub runtime: String,

    /// Runtime CLI used inside nested hosts.
    pub nested_runtime: String,

    /// Install location of the helper inside targets.
    pub helper_install_path: String,

    /// Directory inside a nested host used to stage the helper.
    pub host_staging_dir: String,

    /// Surface architecture detection failure instead of assuming the host's.
    pub strict_architecture: bool,

    /// Upper bound on buffered snapshot content, unbounded if unset.
    pub max_snapshot_bytes: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            nested_runtime: crate::handle::DEFAULT_NESTED_RUNTIME.to_string(),
            helper_install_path: "/tmp/.ctrfs-helper".to_string(),
            host_staging_dir: "/tmp".to_string(),
            strict_architecture: false,
            max_snapshot_bytes: None,
        }
    }
}

impl Config {
    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from the first location that exists.
    ///
    /// An explicit path must exist; the other locations are skipped when
    /// missing.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_path(path)?,
            None => match Self::search_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => {
                    tracing::debug!("loading configuration from {}", path.display());
                    Self::from_path(&path)?
                }
                None => Self::default(),
            },
        };

        if let Ok(runtime) = std::env::var(RUNTIME_ENV)
            && !runtime.is_empty()
        {
            config.runtime = runtime;
        }
        Ok(config)
    }

    /// Candidate configuration files, highest priority first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            paths.push(PathBuf::from(path));
        }
        if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(dir).join("ctrfs/config.toml"));
        } else if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".config/ctrfs/config.toml"));
        }
        paths.push(PathBuf::from(SYSTEM_CONFIG));
        paths
    }
}
