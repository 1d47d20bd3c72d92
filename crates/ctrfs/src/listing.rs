//! Parser for long-form (`ls -la`) directory listings.
//!
//! Output from a remote shell is frequently truncated or interleaved with
//! warnings, so the parser is deliberately tolerant: lines that do not have the
//! long-form shape are dropped and the rest of the listing is kept. The helper
//! program emits the same shape, so one parser serves both strategies.
//!
//! A line is expected to look like:
//!
//! ```text
//! -rw-r--r--    1 root     root          1234 Dec 15 10:30 my file.txt
//! lrwxrwxrwx    1 root     root            10 Dec 15 10:30 link -> /etc/hosts
//! crw-rw-rw-    1 root     root        1,   3 Dec 15 10:30 null
//! ```

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::entry::FileEntry;
use crate::error::{Error, Result};

/// Minimum number of whitespace separated fields in a listing line.
const MIN_FIELDS: usize = 9;

/// Index of the first name field.
const NAME_FIELD: usize = 8;

/// Separator between a symlink name and its target.
const LINK_ARROW: &str = " -> ";

/// Parse listing output that has not yet been decoded.
///
/// `ls` prints file names as raw bytes, so invalid UTF-8 is replaced rather
/// than rejected. Fails with [`Error::ParseFailed`] only for binary output
/// (any NUL byte); malformed lines inside text are skipped.
pub fn parse_listing_bytes(raw: &[u8]) -> Result<Vec<FileEntry>> {
    if raw.contains(&0) {
        return Err(Error::ParseFailed("listing contains binary data".to_string()));
    }
    Ok(parse_listing(&String::from_utf8_lossy(raw)))
}

/// Parse long-form listing text into entries.
///
/// Blank lines, `total NNN` summary lines and lines with fewer than nine
/// fields are skipped. Empty input yields an empty vector.
pub fn parse_listing(text: &str) -> Vec<FileEntry> {
    let now = Utc::now();
    text.lines()
        .filter_map(|line| parse_line(line, now))
        .collect()
}

/// Parse a single listing line, returning `None` for skipped lines.
fn parse_line(line: &str, now: DateTime<Utc>) -> Option<FileEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("total ") || trimmed == "total" {
        return None;
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let permissions = fields[0];
    if permissions.chars().count() < 10 {
        return None;
    }

    // Device nodes print "major, minor" in place of the size, pushing
    // everything after it one field to the right.
    let (size, date_start) = if fields[4].ends_with(',') {
        if fields.len() < MIN_FIELDS + 1 {
            return None;
        }
        (0, 6)
    } else {
        (fields[4].parse::<i64>().unwrap_or(0), 5)
    };
    let name_start = NAME_FIELD + (date_start - 5);

    let modified = parse_modified(
        fields[date_start],
        fields[date_start + 1],
        fields[date_start + 2],
        now,
    );

    let full_name = fields[name_start..].join(" ");
    let (name, link_target) = match full_name.split_once(LINK_ARROW) {
        Some((name, target)) => (name.to_string(), Some(target.to_string())),
        None => (full_name, None),
    };
    if name.is_empty() {
        return None;
    }

    let is_dir = permissions.starts_with('d');
    Some(FileEntry {
        name,
        size: if is_dir { 0 } else { size },
        permissions: permissions.to_string(),
        is_dir,
        modified,
        link_target,
    })
}

/// Parse the three date fields of a listing line.
///
/// Recent files show `Mon DD HH:MM` with the year implied; older files show
/// `Mon DD YYYY`. Anything else maps to the Unix epoch.
fn parse_modified(month: &str, day: &str, time_or_year: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let parsed = (|| {
        let month = month_number(month)?;
        let day: u32 = day.parse().ok()?;

        if let Some((hour, minute)) = time_or_year.split_once(':') {
            let time = NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)?;
            let this_year = NaiveDate::from_ymd_opt(now.year(), month, day)?.and_time(time);
            let candidate = Utc.from_utc_datetime(&this_year);
            if candidate > now + chrono::Duration::days(1) {
                let last_year = NaiveDate::from_ymd_opt(now.year() - 1, month, day)?.and_time(time);
                Some(Utc.from_utc_datetime(&last_year))
            } else {
                Some(candidate)
            }
        } else {
            let year: i32 = time_or_year.parse().ok()?;
            let date = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
            Some(Utc.from_utc_datetime(&date))
        }
    })();

    parsed.unwrap_or(DateTime::UNIX_EPOCH)
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| lower.starts_with(m))
        .map(|i| i as u32 + 1)
}
