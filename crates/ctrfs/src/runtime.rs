//! Boundary with the container runtime CLI.
//!
//! The access layer never spawns processes directly; it hands argument lists
//! to a [`CommandRunner`]. [`RuntimeCli`] is the production implementation,
//! running the configured runtime binary (`docker`, `podman`, ...) as a local
//! child process. Tests substitute scripted runners.
//!
//! There is no timeout or cancellation here: if the runtime hangs, the call
//! hangs. A deadline belongs in a `CommandRunner` implementation, not in its
//! callers.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::handle::render_command_line;

/// Captured result of one runtime invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Bytes written to stdout.
    pub stdout: Vec<u8>,
    /// Bytes written to stderr.
    pub stderr: Vec<u8>,
    /// Whether the process exited with status 0.
    pub success: bool,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            success: true,
        }
    }

    /// A failed result with the given stderr.
    pub fn failed(stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            success: false,
        }
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        out.extend_from_slice(&self.stdout);
        out.extend_from_slice(&self.stderr);
        out
    }

    /// Combined output as lossy text with surrounding whitespace removed,
    /// for diagnostics.
    pub fn combined_text(&self) -> String {
        String::from_utf8_lossy(&self.combined()).trim().to_string()
    }
}

/// Runs argument lists against the runtime CLI.
///
/// Implementations must be usable from several threads at once; browsing
/// operations on different targets run concurrently.
pub trait CommandRunner: Send + Sync {
    /// Name of the program the arguments are passed to, for diagnostics.
    fn program(&self) -> &str;

    /// Run the runtime with `args` and capture its output.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`], not as
    /// an error. `Err` is reserved for failing to launch at all.
    fn run(&self, args: &[String]) -> Result<CommandOutput>;
}

/// [`CommandRunner`] that spawns the runtime binary locally.
#[derive(Debug, Clone)]
pub struct RuntimeCli {
    binary: PathBuf,
    display: String,
}

impl RuntimeCli {
    /// Create a runner for `binary` (looked up in `PATH` when not absolute).
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        let binary = binary.into();
        let display = binary.to_string_lossy().into_owned();
        Self { binary, display }
    }
}

impl CommandRunner for RuntimeCli {
    fn program(&self) -> &str {
        &self.display
    }

    fn run(&self, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!("running: {}", render_command_line(&self.display, args));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::CommandFailed {
                command: render_command_line(&self.display, args),
                message: format!("failed to launch: {}", e),
            })?;

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        })
    }
}
