//! Container addressing.
//!
//! A [`ContainerHandle`] names a browsing target and knows how to turn a
//! runtime operation into the argument list for the runtime CLI. Everything
//! above this module is written once against [`ContainerHandle::operation_args`]
//! and [`ContainerHandle::file_operation_args`] and works unchanged whether the
//! target is a plain container or one running inside a Docker-in-Docker host.
//!
//! # Examples
//!
//! ```
//! use ctrfs::ContainerHandle;
//!
//! let direct = ContainerHandle::direct("abc123");
//! assert_eq!(direct.operation_args("stop"), ["stop", "abc123"]);
//!
//! let nested = ContainerHandle::nested("host123", "dind456");
//! assert_eq!(
//!     nested.file_operation_args(["ls", "-la", "/"]),
//!     ["exec", "host123", "docker", "exec", "dind456", "ls", "-la", "/"],
//! );
//! ```

use std::fmt;

/// Runtime binary invoked inside a nested host unless configured otherwise.
pub const DEFAULT_NESTED_RUNTIME: &str = "docker";

/// A browsing target.
///
/// Handles are immutable value objects created once per browsing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContainerHandle {
    /// A container reachable directly through the runtime CLI.
    Direct {
        /// Container identifier.
        id: String,
    },
    /// A container running inside another container (Docker-in-Docker).
    Nested {
        /// Identifier of the reachable host container.
        host_id: String,
        /// Identifier of the workload container inside the host.
        id: String,
        /// Runtime binary to invoke inside the host.
        runtime: String,
    },
}

impl ContainerHandle {
    /// Create a handle for a directly reachable container.
    pub fn direct(id: impl Into<String>) -> Self {
        ContainerHandle::Direct { id: id.into() }
    }

    /// Create a handle for a container nested inside `host_id`, driven by the
    /// default runtime binary inside the host.
    pub fn nested(host_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self::nested_with_runtime(host_id, id, DEFAULT_NESTED_RUNTIME)
    }

    /// Create a nested handle with an explicit runtime binary inside the host.
    pub fn nested_with_runtime(
        host_id: impl Into<String>,
        id: impl Into<String>,
        runtime: impl Into<String>,
    ) -> Self {
        ContainerHandle::Nested {
            host_id: host_id.into(),
            id: id.into(),
            runtime: runtime.into(),
        }
    }

    /// The identifier of the workload container itself.
    pub fn container_id(&self) -> &str {
        match self {
            ContainerHandle::Direct { id } | ContainerHandle::Nested { id, .. } => id,
        }
    }

    /// Arguments to run a runtime subcommand (`stop`, `inspect`, `export`...)
    /// against the target.
    pub fn operation_args(&self, command: &str) -> Vec<String> {
        self.operation_args_with(command, std::iter::empty::<&str>())
    }

    /// Like [`operation_args`](Self::operation_args), with flags placed between
    /// the subcommand and the container identifier.
    pub fn operation_args_with<I, S>(&self, command: &str, flags: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = Vec::new();
        if let ContainerHandle::Nested {
            host_id, runtime, ..
        } = self
        {
            args.extend(["exec".to_string(), host_id.clone(), runtime.clone()]);
        }
        args.push(command.to_string());
        args.extend(flags.into_iter().map(Into::into));
        args.push(self.container_id().to_string());
        args
    }

    /// Arguments to execute a program (`ls`, `cat`, the helper) inside the
    /// target.
    pub fn file_operation_args<I, S>(&self, parts: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = self.operation_args("exec");
        args.extend(parts.into_iter().map(Into::into));
        args
    }

    /// Stable key identifying this target in per-session caches.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerHandle::Direct { id } => write!(f, "{}", id),
            ContainerHandle::Nested { host_id, id, .. } => write!(f, "{}/{}", host_id, id),
        }
    }
}

/// Quote a single argument for a POSIX shell.
///
/// Arguments made only of characters that are never special are returned
/// unchanged; everything else is wrapped in single quotes with embedded single
/// quotes written as `'\''`.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Render a program and its arguments as one copy-pasteable command line.
///
/// Commands are always executed argv-style; this rendering exists only for
/// logs and error messages, and is the one place quoting rules live.
pub fn render_command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_operation_args() {
        let handle = ContainerHandle::direct("abc123");
        assert_eq!(handle.operation_args("stop"), vec!["stop", "abc123"]);
        assert_eq!(
            handle.file_operation_args(["cat", "/etc/hosts"]),
            vec!["exec", "abc123", "cat", "/etc/hosts"]
        );
    }

    #[test]
    fn test_nested_operation_args() {
        let handle = ContainerHandle::nested("host123", "dind456");
        assert_eq!(
            handle.operation_args("stop"),
            vec!["exec", "host123", "docker", "stop", "dind456"]
        );
        assert_eq!(
            handle.file_operation_args(["cat", "/etc/hosts"]),
            vec!["exec", "host123", "docker", "exec", "dind456", "cat", "/etc/hosts"]
        );
    }

    #[test]
    fn test_nested_custom_runtime() {
        let handle = ContainerHandle::nested_with_runtime("h", "c", "podman");
        assert_eq!(
            handle.operation_args("inspect"),
            vec!["exec", "h", "podman", "inspect", "c"]
        );
    }

    #[test]
    fn test_operation_args_with_flags() {
        let handle = ContainerHandle::direct("abc");
        assert_eq!(
            handle.operation_args_with("inspect", ["--format", "{{json .}}"]),
            vec!["inspect", "--format", "{{json .}}", "abc"]
        );
    }

    #[test]
    fn test_display_and_key() {
        assert_eq!(ContainerHandle::direct("a").to_string(), "a");
        assert_eq!(ContainerHandle::nested("h", "c").cache_key(), "h/c");
        assert_eq!(ContainerHandle::nested("h", "c").container_id(), "c");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/etc/hosts"), "/etc/hosts");
        assert_eq!(shell_quote("my file.txt"), "'my file.txt'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("{{json .}}"), "'{{json .}}'");
    }

    #[test]
    fn test_render_command_line() {
        let handle = ContainerHandle::nested("host", "inner");
        let args = handle.file_operation_args(["ls", "-la", "/srv/my dir"]);
        assert_eq!(
            render_command_line("docker", &args),
            "docker exec host docker exec inner ls -la '/srv/my dir'"
        );
    }
}
