//! Test fixtures: scripted runtimes and generated archives.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::TempDir;

use ctrfs::{CommandOutput, CommandRunner};

/// A listing shaped like `ls -la /etc` in a small image.
pub const ETC_LISTING: &str = "\
total 16
drwxr-xr-x    1 root     root          4096 Dec 15 10:30 .
drwxr-xr-x    1 root     root          4096 Dec 15 10:30 ..
-rw-r--r--    1 root     root            12 Dec 15 10:25 hostname
-rw-r--r--    1 root     root           174 Dec 15 10:25 hosts
lrwxrwxrwx    1 root     root            12 Dec 15 10:30 mtab -> /proc/mounts
-rw-r--r--    1 root     root            20 Jan  3  2021 os release
";

type Matcher = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

/// A [`CommandRunner`] that replays canned outputs.
///
/// Rules are checked in registration order; the first matching rule answers.
/// Unmatched commands fail with `unexpected command`. Every argument list is
/// recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<(Matcher, CommandOutput)>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    /// Create a runner with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands whose arguments start with `prefix`.
    pub fn on_prefix(self, prefix: &[&str], output: CommandOutput) -> Self {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        self.rule(
            Box::new(move |args: &[String]| args.starts_with(&prefix)),
            output,
        )
    }

    /// Answer commands with any argument equal to `arg`.
    pub fn on_arg(self, arg: &str, output: CommandOutput) -> Self {
        let arg = arg.to_string();
        self.rule(
            Box::new(move |args: &[String]| args.iter().any(|a| *a == arg)),
            output,
        )
    }

    fn rule(mut self, matcher: Matcher, output: CommandOutput) -> Self {
        self.rules.push((matcher, output));
        self
    }

    /// All argument lists issued so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of issued commands whose first argument is `command`.
    pub fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| c[0] == command).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn program(&self) -> &str {
        "docker"
    }

    fn run(&self, args: &[String]) -> ctrfs::Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(args.to_vec());
        Ok(self
            .rules
            .iter()
            .find(|(matches, _)| matches(args))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::failed("unexpected command")))
    }
}

/// One member of a generated archive.
#[derive(Debug, Clone)]
pub enum Member {
    /// Directory with mode 0755.
    Dir(&'static str),
    /// Regular file with mode 0644.
    File(&'static str, &'static [u8]),
    /// Symbolic link to a target.
    Symlink(&'static str, &'static str),
}

/// Build an uncompressed tar archive in memory.
pub fn build_archive(members: &[Member]) -> color_eyre::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for member in members {
        let mut header = tar::Header::new_ustar();
        header.set_mtime(1_700_000_000);
        header.set_uid(0);
        header.set_gid(0);
        match member {
            Member::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, path, std::io::empty())?;
            }
            Member::File(path, content) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(content.len() as u64);
                builder.append_data(&mut header, path, *content)?;
            }
            Member::Symlink(path, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, path, target)?;
            }
        }
    }
    Ok(builder.into_inner()?)
}

/// A small root filesystem as exported by a runtime: no header for `usr/`
/// or `usr/bin/`, so those directories only exist by implication.
pub fn sample_rootfs() -> color_eyre::Result<Vec<u8>> {
    build_archive(&[
        Member::Dir("etc/"),
        Member::File("etc/hostname", b"web-1\n"),
        Member::File("etc/os release", b"ID=alpine\n"),
        Member::Symlink("etc/mtab", "/proc/mounts"),
        Member::File("usr/bin/env", b"\x7fELF"),
        Member::File("usr/bin/sh", b"\x7fELF sh"),
        Member::Dir("tmp/"),
    ])
}

/// A snapshot archive written to a temporary directory.
pub struct TestArchive {
    _temp_dir: TempDir,
    archive_path: PathBuf,
}

impl TestArchive {
    /// Write `archive` to `rootfs.tar` in a new temp dir.
    pub fn new(archive: &[u8]) -> color_eyre::Result<Self> {
        let temp_dir = TempDir::new()?;
        let archive_path = temp_dir.path().join("rootfs.tar");
        std::fs::write(&archive_path, archive)?;
        Ok(Self {
            _temp_dir: temp_dir,
            archive_path,
        })
    }

    /// Path of the archive file.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }
}

impl std::fmt::Debug for TestArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestArchive")
            .field("archive_path", &self.archive_path)
            .finish()
    }
}
