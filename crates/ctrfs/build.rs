//! Embed prebuilt `ctrfs-helper` binaries.
//!
//! Looks for `ctrfs-helper-amd64`, `ctrfs-helper-arm64` and `ctrfs-helper-arm`
//! in `$CTRFS_HELPER_DIR`. Each file found is embedded with `include_bytes!`;
//! a missing file leaves an empty slot that is reported at runtime.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const ARCHES: [&str; 3] = ["amd64", "arm64", "arm"];

fn main() {
    println!("cargo:rerun-if-env-changed=CTRFS_HELPER_DIR");

    let helper_dir = env::var_os("CTRFS_HELPER_DIR").map(PathBuf::from);
    let mut generated = String::new();

    for arch in ARCHES {
        let constant = format!("HELPER_{}", arch.to_uppercase());
        let payload = helper_dir
            .as_deref()
            .map(|dir| dir.join(format!("ctrfs-helper-{}", arch)))
            .filter(|p| p.is_file());

        match payload {
            Some(path) => {
                println!("cargo:rerun-if-changed={}", path.display());
                let path = absolute(&path);
                writeln!(
                    generated,
                    "pub(crate) static {}: &[u8] = include_bytes!({:?});",
                    constant, path
                )
                .expect("writing to a String cannot fail");
            }
            None => {
                if helper_dir.is_some() {
                    println!("cargo:warning=no ctrfs-helper payload for {}", arch);
                }
                writeln!(generated, "pub(crate) static {}: &[u8] = &[];", constant)
                    .expect("writing to a String cannot fail");
            }
        }
    }

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("cargo sets OUT_DIR"));
    fs::write(out_dir.join("helpers.rs"), generated).expect("failed to write helpers.rs");
}

fn absolute(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
