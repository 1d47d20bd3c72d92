//! ctrfs-helper: minimal `ls -la` / `cat` for containers without coreutils
//!
//! This program is copied into containers that ship no usable listing
//! utilities (distroless and scratch images) and run through the runtime's
//! `exec`. Its listing output has the same shape as `ls -la` so the caller
//! parses both with one parser:
//!
//! ```text
//! total 8
//! drwxr-xr-x    2 0        0            4096 Dec 15 10:30 .
//! drwxr-xr-x   18 0        0            4096 Dec 15 10:30 ..
//! -rw-r--r--    1 0        0              12 Jan  3  2021 hosts
//! lrwxrwxrwx    1 0        0               9 Dec 15 10:30 mtab -> /proc/mounts
//! crw-rw-rw-    1 0        0          1,   3 Dec 15 10:30 null
//! ```
//!
//! Owners are printed numerically since targets often lack `/etc/passwd`.

use std::fs::{self, Metadata};
use std::io::{self, Write};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ctrfs-helper")]
#[command(about = "List directories and read files inside a container", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a long-form listing of a directory
    Ls {
        /// Directory (or file) to list
        path: PathBuf,
    },
    /// Copy a file to stdout
    Cat {
        /// File to read
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());

    match cli.command {
        Commands::Ls { path } => list(&path, Utc::now(), &mut out)?,
        Commands::Cat { path } => cat(&path, &mut out)?,
    }

    out.flush().context("Failed to flush stdout")?;
    Ok(())
}

/// Write the listing of `path`. A non-directory lists as its own single line.
fn list(path: &Path, now: DateTime<Utc>, out: &mut impl Write) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("cannot access '{}'", path.display()))?;

    if !meta.is_dir() {
        let line = format_line(path, &path.display().to_string(), &meta, now)?;
        writeln!(out, "{}", line)?;
        return Ok(());
    }

    let mut rows = vec![(".".to_string(), path.to_path_buf(), meta)];
    let parent = path.join("..");
    if let Ok(meta) = fs::symlink_metadata(&parent) {
        rows.push(("..".to_string(), parent, meta));
    }

    let mut children = Vec::new();
    for entry in fs::read_dir(path).with_context(|| format!("cannot open '{}'", path.display()))? {
        let entry = entry?;
        // Entries can vanish between readdir and lstat.
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        children.push((entry.file_name().to_string_lossy().into_owned(), entry.path(), meta));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));
    rows.extend(children);

    // st_blocks counts 512 byte units; ls reports 1K blocks.
    let total: u64 = rows.iter().map(|(_, _, m)| m.blocks()).sum::<u64>() / 2;
    writeln!(out, "total {}", total)?;
    for (name, full, meta) in &rows {
        writeln!(out, "{}", format_line(full, name, meta, now)?)?;
    }
    Ok(())
}

fn cat(path: &Path, out: &mut impl Write) -> Result<()> {
    let mut file =
        fs::File::open(path).with_context(|| format!("cannot open '{}'", path.display()))?;
    io::copy(&mut file, out).with_context(|| format!("cannot read '{}'", path.display()))?;
    Ok(())
}

fn format_line(full: &Path, name: &str, meta: &Metadata, now: DateTime<Utc>) -> Result<String> {
    let file_type = meta.file_type();
    let size = if file_type.is_char_device() || file_type.is_block_device() {
        let (major, minor) = device_numbers(meta.rdev());
        format!("{:>3}, {:>3}", major, minor)
    } else {
        meta.size().to_string()
    };

    let mut display = name.to_string();
    if file_type.is_symlink() {
        let target = fs::read_link(full)
            .with_context(|| format!("cannot read link '{}'", full.display()))?;
        display = format!("{} -> {}", name, target.display());
    }

    Ok(format!(
        "{} {:>4} {:<8} {:<8} {:>8} {} {}",
        mode_string(meta),
        meta.nlink(),
        meta.uid(),
        meta.gid(),
        size,
        format_time(meta.mtime(), now),
        display
    ))
}

/// `ls`-style mode column. Mirrors `ctrfs::entry::permission_string`, which
/// the helper does not link against to stay small and static; a test keeps
/// the two in step.
fn mode_string(meta: &Metadata) -> String {
    let file_type = meta.file_type();
    let type_char = if file_type.is_dir() {
        'd'
    } else if file_type.is_symlink() {
        'l'
    } else if file_type.is_char_device() {
        'c'
    } else if file_type.is_block_device() {
        'b'
    } else if file_type.is_fifo() {
        'p'
    } else if file_type.is_socket() {
        's'
    } else {
        '-'
    };

    render_mode(type_char, meta.mode())
}

fn render_mode(type_char: char, mode: u32) -> String {
    let mut s = String::with_capacity(10);
    s.push(type_char);
    for (shift, special, set, unset) in [(6, 0o4000, 's', 'S'), (3, 0o2000, 's', 'S'), (0, 0o1000, 't', 'T')] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(match (bits & 0o1 != 0, mode & special != 0) {
            (true, true) => set,
            (false, true) => unset,
            (true, false) => 'x',
            (false, false) => '-',
        });
    }
    s
}

/// Split a Linux `dev_t` into major and minor numbers.
fn device_numbers(dev: u64) -> (u64, u64) {
    let major = ((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff);
    let minor = (dev & 0xff) | ((dev >> 12) & !0xff);
    (major, minor)
}

/// `Mon DD HH:MM` within the last six months, `Mon DD  YYYY` otherwise.
fn format_time(mtime: i64, now: DateTime<Utc>) -> String {
    let Some(dt) = DateTime::from_timestamp(mtime, 0) else {
        return "Jan  1  1970".to_string();
    };
    let age = now.signed_duration_since(dt);
    if age.num_seconds() >= 0 && age.num_days() < 182 {
        dt.format("%b %e %H:%M").to_string()
    } else {
        dt.format("%b %e  %Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::os::unix::fs::PermissionsExt;

    fn listing(path: &Path) -> String {
        let mut buf = Vec::new();
        list(path, Utc::now(), &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_listing_parses_like_ls() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("my file.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        std::os::unix::fs::symlink("/etc/hosts", dir.path().join("link")).unwrap();

        let text = listing(dir.path());
        assert!(text.starts_with("total "));

        let entries = ctrfs::listing::parse_listing(&text);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [".", "..", "link", "my file.txt", "sub"]);

        let file = &entries[3];
        assert_eq!(file.size, 5);
        assert!(!file.is_dir);
        assert!(entries[4].is_dir);
        assert_eq!(entries[2].link_target.as_deref(), Some("/etc/hosts"));
    }

    #[test]
    fn test_listing_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single");
        fs::write(&path, b"abc").unwrap();
        let text = listing(&path);
        let entries = ctrfs::listing::parse_listing(&text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, 3);
    }

    #[test]
    fn test_missing_path_fails() {
        let mut buf = Vec::new();
        let err = list(Path::new("/nonexistent/ctrfs"), Utc::now(), &mut buf).unwrap_err();
        assert!(err.to_string().contains("cannot access"));
    }

    #[test]
    fn test_cat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, [0u8, 1, 2, 255]).unwrap();
        let mut buf = Vec::new();
        cat(&path, &mut buf).unwrap();
        assert_eq!(buf, [0u8, 1, 2, 255]);
    }

    #[test]
    fn test_mode_string_special_bits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool");
        fs::write(&path, b"").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        let meta = fs::symlink_metadata(&path).unwrap();
        assert_eq!(mode_string(&meta), "-rwxr-xr-x");

        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o1777)).unwrap();
        let meta = fs::symlink_metadata(dir.path()).unwrap();
        assert_eq!(mode_string(&meta), "drwxrwxrwt");
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_mode_matches_library_rendering() {
        for mode in (0..0o10000).step_by(7).chain([0o4755, 0o2755, 0o1777, 0o6644]) {
            for type_char in ['-', 'd', 'l', 'c'] {
                assert_eq!(
                    render_mode(type_char, mode),
                    ctrfs::entry::permission_string(type_char, mode),
                    "mode {mode:o}"
                );
            }
        }
    }

    #[test]
    fn test_device_numbers() {
        // makedev(1, 3)
        assert_eq!(device_numbers(0x103), (1, 3));
        // makedev(259, 65536)
        let dev = ((259u64 & 0xfff) << 8) | ((65536u64 & 0xff) | ((65536u64 & !0xff) << 12));
        assert_eq!(device_numbers(dev), (259, 65536));
    }

    #[test]
    fn test_format_time() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let recent = Utc.with_ymd_and_hms(2024, 5, 20, 8, 5, 0).unwrap().timestamp();
        let old = Utc.with_ymd_and_hms(2021, 1, 3, 0, 0, 0).unwrap().timestamp();
        assert_eq!(format_time(recent, now), "May 20 08:05");
        assert_eq!(format_time(old, now), "Jan  3  2021");
    }
}
