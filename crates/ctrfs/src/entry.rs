//! The canonical description of one filesystem object.
//!
//! Every data source (remote `ls -la`, the injected helper, an archive
//! snapshot) produces [`FileEntry`] values of the same shape, so callers never
//! need to know where a listing came from.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Permission string used for directories synthesized by the snapshot index.
pub const DEFAULT_DIR_PERMISSIONS: &str = "drwxr-xr-x";

/// One file, directory, symlink or special file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Base name (no trailing `/`, no link arrow).
    pub name: String,

    /// Size in bytes; 0 for directories.
    pub size: i64,

    /// Ten character `ls` style mode, e.g. `drwxr-xr-x`.
    pub permissions: String,

    /// Whether this entry is a directory.
    pub is_dir: bool,

    /// Last modification time.
    pub modified: DateTime<Utc>,

    /// Symlink target. Presence alone marks the entry as a symlink.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl FileEntry {
    /// Create a directory entry with default permissions.
    pub fn directory(name: impl Into<String>, modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            permissions: DEFAULT_DIR_PERMISSIONS.to_string(),
            is_dir: true,
            modified,
            link_target: None,
        }
    }

    /// Returns true if this entry is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.link_target.is_some()
    }

    /// Name as shown to the user: directories get a trailing `/`, symlinks
    /// get ` -> target`.
    pub fn display_name(&self) -> String {
        match &self.link_target {
            Some(target) => format!("{} -> {}", self.name, target),
            None if self.is_dir => format!("{}/", self.name),
            None => self.name.clone(),
        }
    }

    /// Size formatted for display. Directories show `-`.
    pub fn display_size(&self) -> String {
        if self.is_dir {
            "-".to_string()
        } else {
            format_size(self.size.max(0) as u64)
        }
    }
}

/// Render mode bits and a file type character as an `ls` permission string.
///
/// `type_char` is the leading character (`-`, `d`, `l`, `c`, `b`, `p`, `s`).
/// setuid, setgid and sticky bits are folded into the execute positions the
/// same way `ls` does.
pub fn permission_string(type_char: char, mode: u32) -> String {
    let mut out = String::with_capacity(10);
    out.push(type_char);

    let triples = [(0o400, 0o200, 0o100), (0o040, 0o020, 0o010), (0o004, 0o002, 0o001)];
    let specials = [(0o4000, 's', 'S'), (0o2000, 's', 'S'), (0o1000, 't', 'T')];

    for ((r, w, x), (special, with_exec, without_exec)) in triples.into_iter().zip(specials) {
        out.push(if mode & r != 0 { 'r' } else { '-' });
        out.push(if mode & w != 0 { 'w' } else { '-' });
        let exec = mode & x != 0;
        out.push(match (mode & special != 0, exec) {
            (true, true) => with_exec,
            (true, false) => without_exec,
            (false, true) => 'x',
            (false, false) => '-',
        });
    }

    out
}

/// Format a byte count as a human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
