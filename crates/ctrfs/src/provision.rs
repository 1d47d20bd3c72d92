//! Helper binary provisioning.
//!
//! When a target has no usable `ls`/`cat`, the coordinator injects a small
//! statically linked helper (`ctrfs-helper`) and runs that instead. This module
//! owns every step of getting it there:
//!
//! 1. Detect the target's CPU architecture ([`detect_architecture`]).
//! 2. Select the matching payload from the [`HelperSet`] embedded at build time.
//! 3. Stage it to an executable temp file ([`stage_to_temp_file`]).
//! 4. Copy it into the target, through the host when the target is nested
//!    ([`build_injection_commands`]).
//!
//! Targets already injected during the current session are remembered in a
//! [`SessionCache`]. The cache is an explicit value owned by the caller, so two
//! sessions never see each other's state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use sha2::{Digest, Sha256};
use tempfile::TempPath;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handle::{ContainerHandle, render_command_line};
use crate::runtime::CommandRunner;

mod embedded {
    include!(concat!(env!("OUT_DIR"), "/helpers.rs"));
}

/// CPU architectures a helper payload can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Architecture {
    /// x86-64.
    Amd64,
    /// 64-bit ARM.
    Arm64,
    /// 32-bit ARM (v6/v7).
    Arm,
}

impl Architecture {
    /// All supported architectures.
    pub const ALL: [Architecture; 3] = [Architecture::Amd64, Architecture::Arm64, Architecture::Arm];

    /// Normalize an architecture name as reported by `uname -m`, a runtime's
    /// platform string (`linux/arm64/v8`) or Go's `GOARCH`.
    pub fn normalize(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        // "os/arch[/variant]" platform strings carry the arch second.
        let arch = name.split('/').nth(1).unwrap_or(&name);
        match arch {
            "amd64" | "x86_64" | "x86-64" | "x64" => Some(Architecture::Amd64),
            "arm64" | "aarch64" | "arm64v8" | "armv8" | "armv8l" => Some(Architecture::Arm64),
            "arm" | "armhf" | "armel" | "armv6" | "armv6l" | "armv7" | "armv7l" | "arm32v7" => {
                Some(Architecture::Arm)
            }
            _ => None,
        }
    }

    /// Architecture of the running process.
    pub fn host() -> Option<Self> {
        Self::normalize(std::env::consts::ARCH)
    }

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::Amd64 => "amd64",
            Architecture::Arm64 => "arm64",
            Architecture::Arm => "arm",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One embedded helper executable.
#[derive(Debug, Clone)]
struct Payload {
    bytes: &'static [u8],
    digest: String,
}

impl Payload {
    fn new(bytes: &'static [u8]) -> Self {
        Self {
            bytes,
            digest: format!("{:x}", Sha256::digest(bytes)),
        }
    }
}

/// Fixed mapping from architecture to helper executable.
///
/// Read-only after construction.
#[derive(Debug, Clone)]
pub struct HelperSet {
    payloads: BTreeMap<Architecture, Payload>,
}

impl HelperSet {
    /// The payloads embedded into this build. Slots without a payload are
    /// present but empty.
    pub fn embedded() -> Self {
        Self::from_payloads([
            (Architecture::Amd64, embedded::HELPER_AMD64),
            (Architecture::Arm64, embedded::HELPER_ARM64),
            (Architecture::Arm, embedded::HELPER_ARM),
        ])
    }

    /// Build a set from explicit payloads.
    pub fn from_payloads<I>(payloads: I) -> Self
    where
        I: IntoIterator<Item = (Architecture, &'static [u8])>,
    {
        Self {
            payloads: payloads
                .into_iter()
                .map(|(arch, bytes)| (arch, Payload::new(bytes)))
                .collect(),
        }
    }

    /// Architectures with a non-empty payload.
    pub fn available(&self) -> Vec<Architecture> {
        self.payloads
            .iter()
            .filter(|(_, p)| !p.bytes.is_empty())
            .map(|(arch, _)| *arch)
            .collect()
    }

    /// Select the payload for an architecture name.
    ///
    /// Fails with [`Error::UnsupportedArchitecture`] if the name does not
    /// normalize to a slot in this set, and [`Error::MissingPayload`] if the
    /// slot is empty.
    pub fn select_binary(&self, architecture: &str) -> Result<&'static [u8]> {
        self.payload(architecture).map(|p| p.bytes)
    }

    fn payload(&self, architecture: &str) -> Result<&Payload> {
        let arch = Architecture::normalize(architecture)
            .ok_or_else(|| Error::UnsupportedArchitecture(architecture.to_string()))?;
        let payload = self
            .payloads
            .get(&arch)
            .ok_or_else(|| Error::UnsupportedArchitecture(arch.to_string()))?;
        if payload.bytes.is_empty() {
            return Err(Error::MissingPayload(arch.to_string()));
        }
        Ok(payload)
    }
}

/// Write a payload to a uniquely named, executable temp file.
///
/// The file is removed when the returned [`TempPath`] is dropped or closed.
pub fn stage_to_temp_file(bytes: &[u8]) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("ctrfs-helper-")
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    file.as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o755))?;
    Ok(file.into_temp_path())
}

/// Runtime commands that copy a staged helper into the target.
///
/// A direct target needs one `cp`. A nested target needs two: host side to
/// `host_staging_path` inside the host container, then from there into the
/// nested container using the runtime inside the host.
pub fn build_injection_commands(
    handle: &ContainerHandle,
    staged: &Path,
    install_path: &str,
    host_staging_path: &str,
) -> Vec<Vec<String>> {
    let staged = staged.to_string_lossy().into_owned();
    match handle {
        ContainerHandle::Direct { id } => vec![vec![
            "cp".to_string(),
            staged,
            format!("{}:{}", id, install_path),
        ]],
        ContainerHandle::Nested {
            host_id,
            id,
            runtime,
        } => vec![
            vec![
                "cp".to_string(),
                staged,
                format!("{}:{}", host_id, host_staging_path),
            ],
            vec![
                "exec".to_string(),
                host_id.clone(),
                runtime.clone(),
                "cp".to_string(),
                host_staging_path.to_string(),
                format!("{}:{}", id, install_path),
            ],
        ],
    }
}

/// Command that removes the intermediate copy a nested injection leaves in
/// the host container. Direct targets have none.
pub fn build_cleanup_command(
    handle: &ContainerHandle,
    host_staging_path: &str,
) -> Option<Vec<String>> {
    match handle {
        ContainerHandle::Direct { .. } => None,
        ContainerHandle::Nested { host_id, .. } => Some(vec![
            "exec".to_string(),
            host_id.clone(),
            "rm".to_string(),
            "-f".to_string(),
            host_staging_path.to_string(),
        ]),
    }
}

/// Detect the CPU architecture of a target.
///
/// Tries `uname -m` inside the target first, then the runtime's `inspect`
/// output (an `os/arch` platform string, an `Architecture` field, or an
/// `architecture` label).
pub fn detect_architecture(
    runner: &dyn CommandRunner,
    handle: &ContainerHandle,
) -> Result<Architecture> {
    let mut reasons = Vec::new();

    let uname = handle.file_operation_args(["uname", "-m"]);
    match runner.run(&uname) {
        Ok(out) if out.success => {
            let reported = String::from_utf8_lossy(&out.stdout);
            match Architecture::normalize(&reported) {
                Some(arch) => return Ok(arch),
                None => reasons.push(format!("uname reported {:?}", reported.trim())),
            }
        }
        Ok(out) => reasons.push(format!("uname failed: {}", out.combined_text())),
        Err(e) => reasons.push(e.to_string()),
    }

    let inspect = handle.operation_args_with("inspect", ["--format", "{{json .}}"]);
    match runner.run(&inspect) {
        Ok(out) if out.success => match architecture_from_inspect(&out.stdout) {
            Ok(Some(arch)) => return Ok(arch),
            Ok(None) => reasons.push("inspect output names no architecture".to_string()),
            Err(e) => reasons.push(e.to_string()),
        },
        Ok(out) => reasons.push(format!(
            "`{}` failed: {}",
            render_command_line(runner.program(), &inspect),
            out.combined_text()
        )),
        Err(e) => reasons.push(e.to_string()),
    }

    Err(Error::ArchitectureDetection {
        target: handle.to_string(),
        reason: reasons.join("; "),
    })
}

/// Extract an architecture from runtime `inspect` JSON.
///
/// Accepts a single object or the one-element array `docker inspect` prints
/// without `--format`.
fn architecture_from_inspect(raw: &[u8]) -> Result<Option<Architecture>> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    let object = match &value {
        serde_json::Value::Array(items) => items.first().unwrap_or(&serde_json::Value::Null),
        other => other,
    };

    let candidates = [
        object.get("Platform"),
        object.get("Architecture"),
        object
            .get("Config")
            .and_then(|c| c.get("Labels"))
            .and_then(|l| l.get("architecture")),
    ];

    Ok(candidates
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .find_map(Architecture::normalize))
}

/// Per-session state for the provisioner.
///
/// Remembers detected architectures and which targets already hold which
/// helper payload. Safe to share between the worker threads of one session.
#[derive(Debug, Default)]
pub struct SessionCache {
    /// (target key, payload digest) pairs already injected.
    injected: RwLock<HashSet<(String, String)>>,
    architectures: RwLock<HashMap<String, Architecture>>,
}

impl SessionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn is_injected(&self, handle: &ContainerHandle, digest: &str) -> bool {
        self.injected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(handle.cache_key(), digest.to_string()))
    }

    fn mark_injected(&self, handle: &ContainerHandle, digest: &str) {
        self.injected
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((handle.cache_key(), digest.to_string()));
    }

    /// Cached architecture for a target, if detected earlier.
    pub fn architecture(&self, handle: &ContainerHandle) -> Option<Architecture> {
        self.architectures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.cache_key())
            .copied()
    }

    fn remember_architecture(&self, handle: &ContainerHandle, arch: Architecture) {
        self.architectures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.cache_key(), arch);
    }

    /// Drop everything known about a target, e.g. after it was restarted and
    /// the injected helper may be gone.
    pub fn forget(&self, handle: &ContainerHandle) {
        let key = handle.cache_key();
        self.injected
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(k, _)| *k != key);
        self.architectures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }

    /// Whether a target holds any injected helper.
    pub fn has_helper(&self, handle: &ContainerHandle) -> bool {
        let key = handle.cache_key();
        self.injected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(k, _)| *k == key)
    }
}

/// Places the helper inside targets on demand.
#[derive(Debug, Clone)]
pub struct HelperProvisioner {
    helpers: HelperSet,
    install_path: String,
    host_staging_dir: String,
    strict_architecture: bool,
}

impl HelperProvisioner {
    /// Create a provisioner using the embedded payloads and `config`.
    pub fn new(config: &Config) -> Self {
        Self::with_helpers(HelperSet::embedded(), config)
    }

    /// Create a provisioner with an explicit payload set.
    pub fn with_helpers(helpers: HelperSet, config: &Config) -> Self {
        Self {
            helpers,
            install_path: config.helper_install_path.clone(),
            host_staging_dir: config.host_staging_dir.clone(),
            strict_architecture: config.strict_architecture,
        }
    }

    /// Path of the helper inside targets.
    pub fn install_path(&self) -> &str {
        &self.install_path
    }

    /// Architecture of a target, detected once per session.
    ///
    /// If detection fails the host architecture is assumed with a warning,
    /// unless strict detection is configured.
    pub fn resolve_architecture(
        &self,
        runner: &dyn CommandRunner,
        handle: &ContainerHandle,
        cache: &SessionCache,
    ) -> Result<Architecture> {
        if let Some(arch) = cache.architecture(handle) {
            return Ok(arch);
        }

        let arch = match detect_architecture(runner, handle) {
            Ok(arch) => arch,
            Err(e) if self.strict_architecture => return Err(e),
            Err(e) => {
                let host = Architecture::host().ok_or_else(|| {
                    Error::UnsupportedArchitecture(std::env::consts::ARCH.to_string())
                })?;
                tracing::warn!("{}; assuming host architecture {}", e, host);
                host
            }
        };
        cache.remember_architecture(handle, arch);
        Ok(arch)
    }

    /// Make sure the helper is present in the target and return its path.
    pub fn ensure_installed(
        &self,
        runner: &dyn CommandRunner,
        handle: &ContainerHandle,
        cache: &SessionCache,
    ) -> Result<String> {
        let arch = self.resolve_architecture(runner, handle, cache)?;
        let payload = self.helpers.payload(arch.as_str())?;
        if cache.is_injected(handle, &payload.digest) {
            return Ok(self.install_path.clone());
        }

        let staged = stage_to_temp_file(payload.bytes)?;
        let host_staging_path = format!(
            "{}/ctrfs-helper-{}",
            self.host_staging_dir.trim_end_matches('/'),
            &payload.digest[..12]
        );
        let commands =
            build_injection_commands(handle, &staged, &self.install_path, &host_staging_path);

        let mut result = Ok(());
        let mut copied = 0;
        for args in &commands {
            let out = runner.run(args)?;
            if !out.success {
                result = Err(Error::CommandFailed {
                    command: render_command_line(runner.program(), args),
                    message: out.combined_text(),
                });
                break;
            }
            copied += 1;
        }

        if let Err(e) = staged.close() {
            tracing::warn!("failed to remove staged helper: {}", e);
        }
        if copied > 0
            && let Some(cleanup) = build_cleanup_command(handle, &host_staging_path)
        {
            remove_host_copy(runner, &cleanup);
        }
        result?;

        tracing::debug!(container = %handle, arch = %arch, "injected helper");
        cache.mark_injected(handle, &payload.digest);
        Ok(self.install_path.clone())
    }
}

/// Best effort: a leftover copy in the host is logged, never escalated.
fn remove_host_copy(runner: &dyn CommandRunner, args: &[String]) {
    match runner.run(args) {
        Ok(out) if out.success => {}
        Ok(out) => tracing::warn!(
            "`{}` failed: {}",
            render_command_line(runner.program(), args),
            out.combined_text()
        ),
        Err(e) => tracing::warn!("failed to remove staged helper from host: {}", e),
    }
}
