//! Output formatting utilities for the CLI.
//!
//! Listings are printed either as a table for humans or as JSON for scripts.
//!
//! # Usage
//!
//! ```ignore
//! use output::{OutputFormat, output_entries};
//!
//! #[derive(clap::Parser)]
//! struct Args {
//!     #[arg(long, default_value = "table")]
//!     format: OutputFormat,
//! }
//!
//! output_entries(&entries, args.format)?;
//! ```

use chrono::{DateTime, Datelike, Utc};
use clap::ValueEnum;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ctrfs::{Architecture, FileEntry};
use serde::Serialize;

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// Machine-parseable JSON format.
    Json,
}

/// Architecture report for the `arch` command.
#[derive(Debug, Serialize)]
pub struct ArchOutput {
    /// Target as given on the command line.
    pub target: String,
    /// Detected architecture.
    pub architecture: String,
    /// Whether a helper for this architecture is embedded in this build.
    pub helper_available: bool,
}

impl ArchOutput {
    pub fn new(target: String, architecture: Architecture, available: &[Architecture]) -> Self {
        Self {
            target,
            architecture: architecture.to_string(),
            helper_available: available.contains(&architecture),
        }
    }
}

/// Format a modification time the way `ls -l` does: time of day for recent
/// files, the year for anything older than six months.
pub fn format_modified(dt: DateTime<Utc>) -> String {
    let now = Utc::now();
    let age = now.signed_duration_since(dt);
    if age.num_days() < 180 && age.num_seconds() >= 0 && dt.year() > 1970 {
        dt.format("%b %e %H:%M").to_string()
    } else {
        dt.format("%b %e  %Y").to_string()
    }
}

/// Create a styled table with consistent formatting.
pub fn create_styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Build the table for a directory listing.
pub fn entries_table(entries: &[FileEntry]) -> Table {
    let mut table = create_styled_table();
    table.set_header(vec!["MODE", "SIZE", "MODIFIED", "NAME"]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(&entry.permissions),
            Cell::new(entry.display_size()).set_alignment(CellAlignment::Right),
            Cell::new(format_modified(entry.modified)),
            Cell::new(entry.display_name()),
        ]);
    }
    table
}

/// Output a directory listing in the specified format.
pub fn output_entries(entries: &[FileEntry], format: OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string(entries)?;
            println!("{}", json);
        }
        OutputFormat::Table => println!("{}", entries_table(entries)),
    }
    Ok(())
}

/// Output an architecture report in the specified format.
pub fn output_arch(report: &ArchOutput, format: OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
        OutputFormat::Table => {
            let mut table = create_styled_table();
            table.add_row(vec!["Target", report.target.as_str()]);
            table.add_row(vec!["Architecture", report.architecture.as_str()]);
            table.add_row(vec![
                "Helper",
                if report.helper_available {
                    "embedded"
                } else {
                    "missing"
                },
            ]);
            println!("{}", table);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(name: &str, is_dir: bool) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            size: if is_dir { 0 } else { 2048 },
            permissions: if is_dir { "drwxr-xr-x" } else { "-rw-r--r--" }.to_string(),
            is_dir,
            modified: Utc.with_ymd_and_hms(2021, 1, 3, 0, 0, 0).unwrap(),
            link_target: None,
        }
    }

    #[test]
    fn test_format_modified_old_shows_year() {
        let dt = Utc.with_ymd_and_hms(2021, 1, 3, 12, 0, 0).unwrap();
        assert_eq!(format_modified(dt), "Jan  3  2021");
    }

    #[test]
    fn test_format_modified_recent_shows_time() {
        let dt = Utc::now() - chrono::Duration::hours(1);
        assert!(format_modified(dt).contains(':'));
    }

    #[test]
    fn test_entries_table() {
        let rendered = entries_table(&[entry("etc", true), entry("hosts", false)]).to_string();
        assert!(rendered.contains("etc/"));
        assert!(rendered.contains("hosts"));
        assert!(rendered.contains("2.0 KB"));
    }

    #[test]
    fn test_entries_serialize() {
        let json = serde_json::to_string(&[entry("hosts", false)]).unwrap();
        assert!(json.contains("\"name\":\"hosts\""));
        assert!(!json.contains("link_target"));
    }

    #[test]
    fn test_arch_output() {
        let report = ArchOutput::new(
            "abc".to_string(),
            Architecture::Arm64,
            &[Architecture::Amd64],
        );
        assert!(!report.helper_available);
        assert_eq!(report.architecture, "arm64");
    }
}
