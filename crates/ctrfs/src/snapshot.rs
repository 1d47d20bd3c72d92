//! Random-access index over a captured filesystem archive.
//!
//! An [`ArchiveIndex`] consumes a tar stream (for example the output of
//! `docker export`) exactly once and then answers any number of directory
//! listings and file reads from memory.
//!
//! Tar archives are not required to carry a header for every directory; a
//! stream may contain `usr/bin/sh` without ever mentioning `usr/` or
//! `usr/bin/`. The index therefore synthesizes missing ancestor directories
//! while building, and listing falls back to a prefix scan for paths that are
//! only implied by deeper entries.
//!
//! Member names are normalized (leading `./` and `/` removed, trailing `/`
//! removed). Names containing `.` or `..` components are skipped rather than
//! indexed, so two spellings of one path can never alias each other.
//!
//! # Example
//!
//! ```no_run
//! use ctrfs::ArchiveIndex;
//!
//! let file = std::fs::File::open("rootfs.tar")?;
//! let index = ArchiveIndex::build(file)?;
//! for entry in index.list_directory("/etc")? {
//!     println!("{}", entry.display_name());
//! }
//! let _hosts = index.read_file("/etc/hosts")?;
//! # Ok::<(), ctrfs::Error>(())
//! ```

use std::collections::BTreeMap;
use std::io::Read;

use chrono::{DateTime, Utc};
use tar::EntryType;

use crate::entry::{FileEntry, permission_string};
use crate::error::{Error, Result};
use crate::handle::{ContainerHandle, render_command_line};
use crate::runtime::CommandRunner;

/// Mode bits for synthesized directories.
const SYNTHETIC_DIR_MODE: u32 = 0o755;

/// Type of an indexed node, reduced from the tar typeflag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    Char,
    Block,
    Fifo,
    Other,
}

impl NodeKind {
    fn from_entry_type(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Regular | EntryType::Continuous => NodeKind::Regular,
            EntryType::Directory => NodeKind::Directory,
            EntryType::Symlink => NodeKind::Symlink,
            EntryType::Link => NodeKind::Hardlink,
            EntryType::Char => NodeKind::Char,
            EntryType::Block => NodeKind::Block,
            EntryType::Fifo => NodeKind::Fifo,
            _ => NodeKind::Other,
        }
    }

    fn type_char(self) -> char {
        match self {
            NodeKind::Regular | NodeKind::Hardlink | NodeKind::Other => '-',
            NodeKind::Directory => 'd',
            NodeKind::Symlink => 'l',
            NodeKind::Char => 'c',
            NodeKind::Block => 'b',
            NodeKind::Fifo => 'p',
        }
    }
}

/// One indexed archive member (or synthesized directory).
#[derive(Debug, Clone)]
struct Node {
    /// Normalized path, no leading or trailing `/`.
    path: String,
    kind: NodeKind,
    size: u64,
    mode: u32,
    modified: DateTime<Utc>,
    link_target: Option<String>,
    /// Present only for regular files.
    content: Option<Vec<u8>>,
    /// Base name to full path of each direct child.
    children: BTreeMap<String, String>,
}

impl Node {
    fn synthetic_directory(path: String, modified: DateTime<Utc>) -> Self {
        Self {
            path,
            kind: NodeKind::Directory,
            size: 0,
            mode: SYNTHETIC_DIR_MODE,
            modified,
            link_target: None,
            content: None,
            children: BTreeMap::new(),
        }
    }

    fn to_entry(&self, name: &str) -> FileEntry {
        let is_dir = self.kind == NodeKind::Directory;
        FileEntry {
            name: name.to_string(),
            size: if is_dir { 0 } else { self.size as i64 },
            permissions: permission_string(self.kind.type_char(), self.mode),
            is_dir,
            modified: self.modified,
            link_target: if self.kind == NodeKind::Symlink {
                self.link_target.clone()
            } else {
                None
            },
        }
    }
}

/// In-memory index of a filesystem archive.
///
/// Immutable once built; safe to share across threads for concurrent queries.
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    nodes: BTreeMap<String, Node>,
    /// Timestamp given to every synthesized entry, fixed at build time so
    /// repeated queries return identical results.
    built_at: DateTime<Utc>,
    content_bytes: u64,
}

impl ArchiveIndex {
    /// Build an index from a tar stream, buffering all regular-file content.
    pub fn build<R: Read>(reader: R) -> Result<Self> {
        Self::build_inner(reader, None)
    }

    /// Build an index, failing with [`Error::SnapshotTooLarge`] once buffered
    /// file content exceeds `max_content_bytes`.
    pub fn build_bounded<R: Read>(reader: R, max_content_bytes: u64) -> Result<Self> {
        Self::build_inner(reader, Some(max_content_bytes))
    }

    /// Build an index from an in-memory archive.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::build(bytes)
    }

    /// Export the target's filesystem through the runtime CLI and index it.
    pub fn capture(
        runner: &dyn CommandRunner,
        handle: &ContainerHandle,
        max_content_bytes: Option<u64>,
    ) -> Result<Self> {
        let archive = export_archive(runner, handle)?;
        Self::build_inner(archive.as_slice(), max_content_bytes)
    }

    fn build_inner<R: Read>(reader: R, limit: Option<u64>) -> Result<Self> {
        let mut index = Self {
            nodes: BTreeMap::new(),
            built_at: Utc::now(),
            content_bytes: 0,
        };

        let mut archive = tar::Archive::new(reader);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let header = entry.header();
            let entry_type = header.entry_type();

            if matches!(
                entry_type,
                EntryType::XGlobalHeader
                    | EntryType::XHeader
                    | EntryType::GNULongName
                    | EntryType::GNULongLink
            ) {
                continue;
            }

            let raw_path = entry.path()?.to_string_lossy().into_owned();
            let path = match normalize_member_path(&raw_path) {
                Ok(Some(p)) => p,
                // The archive root itself carries nothing worth indexing.
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("skipping archive member: {}", e);
                    continue;
                }
            };

            let kind = NodeKind::from_entry_type(entry_type);
            let mode = header.mode()?;
            let mtime = header.mtime()?;
            let size = entry.size();
            let link_target = entry
                .link_name()?
                .map(|l| l.to_string_lossy().into_owned());

            let content = if kind == NodeKind::Regular {
                if let Some(limit) = limit
                    && index.content_bytes.saturating_add(size) > limit
                {
                    return Err(Error::SnapshotTooLarge { limit });
                }
                // The header size is untrusted; let the buffer grow with what
                // is actually read.
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                if buf.len() as u64 != size {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("archive member {} truncated", raw_path),
                    )));
                }
                index.content_bytes += buf.len() as u64;
                Some(buf)
            } else {
                None
            };

            let node = Node {
                path: path.clone(),
                kind,
                size,
                mode,
                modified: DateTime::from_timestamp(mtime as i64, 0).unwrap_or(DateTime::UNIX_EPOCH),
                link_target,
                content,
                children: BTreeMap::new(),
            };
            index.insert(node);
        }

        tracing::debug!(
            nodes = index.nodes.len(),
            content_bytes = index.content_bytes,
            "built archive index"
        );
        Ok(index)
    }

    /// Insert a node, keeping any children already linked under its path, then
    /// synthesize and link every missing ancestor.
    fn insert(&mut self, mut node: Node) {
        let path = node.path.clone();
        if let Some(existing) = self.nodes.remove(&path) {
            node.children = existing.children;
        }
        self.nodes.insert(path.clone(), node);

        let mut child = path;
        while let Some((parent, base)) = child.rsplit_once('/') {
            let parent = parent.to_string();
            let base = base.to_string();
            let built_at = self.built_at;
            let parent_node = self
                .nodes
                .entry(parent.clone())
                .or_insert_with(|| Node::synthetic_directory(parent.clone(), built_at));
            let already_linked = parent_node.children.insert(base, child).is_some();
            if already_linked {
                break;
            }
            child = parent;
        }
    }

    /// Number of indexed nodes, synthesized directories included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the archive contained no indexable members.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total bytes of buffered regular-file content.
    pub fn content_bytes(&self) -> u64 {
        self.content_bytes
    }

    /// List the entries of a directory.
    ///
    /// `/` and the empty string name the archive root. Non-root listings start
    /// with synthetic `.` and `..` entries. Fails with [`Error::NotFound`] when
    /// the path is neither a directory nor a prefix of any indexed path.
    pub fn list_directory(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = normalize_query_path(path);
        if path.is_empty() {
            return Ok(self.list_root());
        }

        let children: Vec<FileEntry> = match self.nodes.get(&path) {
            Some(node) if node.kind == NodeKind::Directory => node
                .children
                .iter()
                .filter_map(|(base, child_path)| {
                    self.nodes.get(child_path).map(|child| self.entry(child, base))
                })
                .collect(),
            _ => self.scan_prefix(&path),
        };

        if children.is_empty() && !self.is_directory(&path) {
            return Err(Error::NotFound(format!("/{}", path)));
        }

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(FileEntry::directory(".", self.built_at));
        entries.push(FileEntry::directory("..", self.built_at));
        entries.extend(children);
        Ok(entries)
    }

    /// Root listing: every distinct first path segment in the index.
    fn list_root(&self) -> Vec<FileEntry> {
        let mut seen: BTreeMap<&str, FileEntry> = BTreeMap::new();
        for path in self.nodes.keys() {
            let top = path.split('/').next().unwrap_or(path);
            if seen.contains_key(top) {
                continue;
            }
            let entry = match self.nodes.get(top) {
                Some(node) => self.entry(node, top),
                None => FileEntry::directory(top, self.built_at),
            };
            seen.insert(top, entry);
        }
        seen.into_values().collect()
    }

    /// Listing for a directory implied only by deeper paths.
    fn scan_prefix(&self, path: &str) -> Vec<FileEntry> {
        let prefix = format!("{}/", path);
        let mut found: BTreeMap<&str, FileEntry> = BTreeMap::new();

        for (key, node) in self.nodes.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                break;
            };
            let (first, deeper) = match rest.split_once('/') {
                Some((first, _)) => (first, true),
                None => (rest, false),
            };
            if found.contains_key(first) && deeper {
                continue;
            }
            let entry = if deeper {
                FileEntry::directory(first, self.built_at)
            } else {
                self.entry(node, first)
            };
            found.insert(first, entry);
        }

        found.into_values().collect()
    }

    /// Listing entry for a node. Hard links report the size of the file they
    /// point to, as `ls` does.
    fn entry(&self, node: &Node, name: &str) -> FileEntry {
        let mut entry = node.to_entry(name);
        if node.kind == NodeKind::Hardlink
            && let Some(target) = self.hardlink_target(node)
        {
            entry.size = target.size as i64;
        }
        entry
    }

    /// The regular file a hard link refers to.
    fn hardlink_target(&self, node: &Node) -> Option<&Node> {
        node.link_target
            .as_deref()
            .and_then(|t| normalize_member_path(t).ok().flatten())
            .and_then(|t| self.nodes.get(&t))
            .filter(|t| t.kind == NodeKind::Regular)
    }

    fn is_directory(&self, path: &str) -> bool {
        self.nodes
            .get(path)
            .is_some_and(|n| n.kind == NodeKind::Directory)
    }

    /// Read the content of a regular file.
    ///
    /// Hard links resolve to the content of their target. Directories,
    /// symlinks and special files fail with [`Error::NotARegularFile`].
    pub fn read_file(&self, path: &str) -> Result<&[u8]> {
        let path = normalize_query_path(path);
        let node = self
            .nodes
            .get(&path)
            .ok_or_else(|| Error::NotFound(format!("/{}", path)))?;

        match node.kind {
            NodeKind::Regular => Ok(node.content.as_deref().unwrap_or_default()),
            NodeKind::Hardlink => {
                let target = self
                    .hardlink_target(node)
                    .ok_or_else(|| Error::NotARegularFile(format!("/{}", path)))?;
                Ok(target.content.as_deref().unwrap_or_default())
            }
            _ => Err(Error::NotARegularFile(format!("/{}", path))),
        }
    }
}

/// Run the runtime's `export` for a target and return the raw tar stream.
pub fn export_archive(runner: &dyn CommandRunner, handle: &ContainerHandle) -> Result<Vec<u8>> {
    let args = handle.operation_args("export");
    let output = runner.run(&args)?;
    if !output.success {
        return Err(Error::CommandFailed {
            command: render_command_line(runner.program(), &args),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    tracing::debug!(container = %handle, bytes = output.stdout.len(), "exported filesystem");
    Ok(output.stdout)
}

/// Normalize an archive member name.
///
/// Returns `Ok(None)` for the archive root and [`Error::InvalidPath`] for names
/// with `.` or `..` components.
fn normalize_member_path(raw: &str) -> Result<Option<String>> {
    let mut trimmed = raw;
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    let trimmed = trimmed.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return Ok(None);
    }

    let mut parts = Vec::new();
    for part in trimmed.split('/') {
        match part {
            "" => continue,
            "." | ".." => return Err(Error::InvalidPath(raw.to_string())),
            other => parts.push(other),
        }
    }
    Ok(Some(parts.join("/")))
}

/// Normalize a caller-supplied query path. Empty means root.
fn normalize_query_path(raw: &str) -> String {
    raw.split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Member<'a> {
        Dir(&'a str),
        File(&'a str, &'a [u8]),
        Symlink(&'a str, &'a str),
        Hardlink(&'a str, &'a str),
    }

    fn archive(members: &[Member<'_>]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut buf);
            for member in members {
                let mut header = tar::Header::new_gnu();
                header.set_mtime(1_700_000_000);
                match member {
                    Member::Dir(path) => {
                        header.set_entry_type(EntryType::Directory);
                        header.set_mode(0o755);
                        header.set_size(0);
                        header.set_path(path).unwrap();
                        header.set_cksum();
                        builder.append(&header, std::io::empty()).unwrap();
                    }
                    Member::File(path, data) => {
                        header.set_entry_type(EntryType::Regular);
                        header.set_mode(0o644);
                        header.set_size(data.len() as u64);
                        header.set_path(path).unwrap();
                        header.set_cksum();
                        builder.append(&header, *data).unwrap();
                    }
                    Member::Symlink(path, target) => {
                        header.set_entry_type(EntryType::Symlink);
                        header.set_mode(0o777);
                        header.set_size(0);
                        header.set_path(path).unwrap();
                        header.set_link_name(target).unwrap();
                        header.set_cksum();
                        builder.append(&header, std::io::empty()).unwrap();
                    }
                    Member::Hardlink(path, target) => {
                        header.set_entry_type(EntryType::Link);
                        header.set_mode(0o644);
                        header.set_size(0);
                        header.set_path(path).unwrap();
                        header.set_link_name(target).unwrap();
                        header.set_cksum();
                        builder.append(&header, std::io::empty()).unwrap();
                    }
                }
            }
            builder.finish().unwrap();
        }
        buf
    }

    fn names(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_list_and_read_explicit_directory() {
        let tar = archive(&[Member::Dir("a/"), Member::File("a/b.txt", b"X")]);
        let index = ArchiveIndex::from_bytes(&tar).unwrap();

        let entries = index.list_directory("a").unwrap();
        assert_eq!(names(&entries), vec![".", "..", "b.txt"]);
        let files: Vec<_> = entries.iter().filter(|e| !e.is_dir).collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 1);
        assert_eq!(files[0].permissions, "-rw-r--r--");

        assert_eq!(index.read_file("a/b.txt").unwrap(), b"X");
        assert_eq!(index.read_file("/a/b.txt").unwrap(), b"X");
    }

    #[test]
    fn test_synthesizes_missing_directories() {
        let tar = archive(&[Member::File("x/y/z.txt", b"zz")]);
        let index = ArchiveIndex::from_bytes(&tar).unwrap();

        let x = index.list_directory("x").unwrap();
        assert_eq!(names(&x), vec![".", "..", "y"]);
        assert!(x[2].is_dir);
        assert_eq!(x[2].permissions, "drwxr-xr-x");

        let xy = index.list_directory("/x/y/").unwrap();
        assert_eq!(names(&xy), vec![".", "..", "z.txt"]);
        assert!(!xy[2].is_dir);

        let root = index.list_directory("/").unwrap();
        assert_eq!(names(&root), vec!["x"]);
        assert!(root[0].is_dir);
    }

    #[test]
    fn test_late_directory_header_keeps_children() {
        let tar = archive(&[Member::File("etc/hosts", b"127.0.0.1"), Member::Dir("etc/")]);
        let index = ArchiveIndex::from_bytes(&tar).unwrap();
        let etc = index.list_directory("etc").unwrap();
        assert_eq!(names(&etc), vec![".", "..", "hosts"]);
    }

    #[test]
    fn test_root_listing_has_no_dot_entries() {
        let tar = archive(&[
            Member::Dir("./bin/"),
            Member::File("./bin/sh", b"#!"),
            Member::File("./README", b"hi"),
        ]);
        let index = ArchiveIndex::from_bytes(&tar).unwrap();
        let root = index.list_directory("").unwrap();
        assert_eq!(names(&root), vec!["README", "bin"]);
        assert_eq!(index.list_directory("/").unwrap(), root);
    }

    #[test]
    fn test_prefix_scan_below_non_directory() {
        // A path that exists only as a non-directory node but has deeper
        // members is listed by scanning for the prefix.
        let tar = archive(&[
            Member::File("odd", b""),
            Member::File("odd/inner/deep.txt", b"d"),
            Member::File("odd/top.txt", b"t"),
        ]);
        let index = ArchiveIndex::from_bytes(&tar).unwrap();
        let entries = index.list_directory("odd").unwrap();
        assert_eq!(names(&entries), vec![".", "..", "inner", "top.txt"]);
        assert!(entries[2].is_dir);
        assert!(!entries[3].is_dir);
    }

    #[test]
    fn test_symlink_entry() {
        let tar = archive(&[
            Member::Dir("etc/"),
            Member::Symlink("etc/mtab", "/proc/self/mounts"),
        ]);
        let index = ArchiveIndex::from_bytes(&tar).unwrap();
        let entries = index.list_directory("etc").unwrap();
        let mtab = entries.iter().find(|e| e.name == "mtab").unwrap();
        assert_eq!(mtab.link_target.as_deref(), Some("/proc/self/mounts"));
        assert!(mtab.permissions.starts_with('l'));

        let err = index.read_file("etc/mtab").unwrap_err();
        assert!(matches!(err, Error::NotARegularFile(_)));
    }

    #[test]
    fn test_hardlink_reads_target_content() {
        let tar = archive(&[
            Member::File("bin/busybox", b"ELF"),
            Member::Hardlink("bin/ls", "bin/busybox"),
        ]);
        let index = ArchiveIndex::from_bytes(&tar).unwrap();
        assert_eq!(index.read_file("bin/ls").unwrap(), b"ELF");

        let bin = index.list_directory("bin").unwrap();
        let ls = bin.iter().find(|e| e.name == "ls").unwrap();
        assert_eq!(ls.size, 3);
        assert_eq!(ls.permissions, "-rw-r--r--");
    }

    #[test]
    fn test_read_errors() {
        let tar = archive(&[Member::Dir("a/"), Member::File("a/b.txt", b"X")]);
        let index = ArchiveIndex::from_bytes(&tar).unwrap();
        assert!(matches!(index.read_file("a"), Err(Error::NotARegularFile(_))));
        assert!(matches!(index.read_file("a/nope"), Err(Error::NotFound(_))));
        assert!(matches!(index.list_directory("zzz"), Err(Error::NotFound(_))));
        assert!(matches!(index.list_directory("a/b.txt"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_dotdot_members_skipped() {
        let tar = {
            // tar::Header::set_path refuses "..", so write the name bytes directly.
            let mut buf = Vec::new();
            let mut builder = tar::Builder::new(&mut buf);
            let mut header = tar::Header::new_old();
            let name = b"a/../escape";
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(1);
            header.set_cksum();
            builder.append(&header, &b"!"[..]).unwrap();
            builder.finish().unwrap();
            drop(builder);
            buf
        };
        let index = ArchiveIndex::from_bytes(&tar).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_idempotent_listing() {
        let tar = archive(&[Member::File("x/y/z.txt", b"zz"), Member::File("x/w", b"w")]);
        let index = ArchiveIndex::from_bytes(&tar).unwrap();
        let first = index.list_directory("x").unwrap();
        let second = index.list_directory("x").unwrap();
        assert_eq!(first, second);
        assert_eq!(index.list_directory("/").unwrap(), index.list_directory("").unwrap());
    }

    #[test]
    fn test_bounded_build() {
        let tar = archive(&[Member::File("big", &[0u8; 2048])]);
        let err = ArchiveIndex::build_bounded(tar.as_slice(), 1024).unwrap_err();
        assert!(matches!(err, Error::SnapshotTooLarge { limit: 1024 }));

        let index = ArchiveIndex::build_bounded(tar.as_slice(), 4096).unwrap();
        assert_eq!(index.content_bytes(), 2048);
    }

    #[test]
    fn test_oversized_header_fails_without_allocating() {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(u64::MAX / 2);
        header.set_path("huge").unwrap();
        header.set_cksum();
        let mut tar = header.as_bytes().to_vec();
        tar.extend_from_slice(&[0u8; 512]);

        let err = ArchiveIndex::from_bytes(&tar).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err}");
    }

    #[test]
    fn test_corrupt_archive() {
        let garbage = vec![0x41u8; 1024];
        assert!(ArchiveIndex::from_bytes(&garbage).is_err());
    }

    #[test]
    fn test_normalize_member_path() {
        assert_eq!(normalize_member_path("./").unwrap(), None);
        assert_eq!(normalize_member_path("./a/b/").unwrap().as_deref(), Some("a/b"));
        assert_eq!(normalize_member_path("/a//b").unwrap().as_deref(), Some("a/b"));
        assert!(normalize_member_path("a/./b").is_err());
        assert!(normalize_member_path("../b").is_err());
    }

    #[test]
    fn test_index_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ArchiveIndex>();
    }
}
