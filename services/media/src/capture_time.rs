//! Capture-time inference
//!
//! Picks one timestamp per file from, in order: the embedded metadata
//! timestamp, a `YYYYMMDD` run in the file name, a `YYYY/MM` pair of
//! ancestor directories, and finally the file's modification time.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("valid digit run pattern"));

/// Resolve the capture time of a file; never fails.
pub fn resolve(
    embedded: Option<DateTime<Local>>,
    file_name: &str,
    file_path: &Path,
    modified: DateTime<Local>,
) -> DateTime<Local> {
    embedded
        .or_else(|| from_file_name(file_name))
        .or_else(|| from_directories(file_path))
        .unwrap_or(modified)
}

/// Noon on the first standalone 8-digit run of the name that is a valid date
pub fn from_file_name(file_name: &str) -> Option<DateTime<Local>> {
    DIGIT_RUN
        .find_iter(file_name)
        .map(|run| run.as_str())
        .filter(|run| run.len() == 8)
        .find_map(|run| {
            let year = run[0..4].parse().ok()?;
            let month = run[4..6].parse().ok()?;
            let day = run[6..8].parse().ok()?;
            local_noon(year, month, day)
        })
}

/// Noon on the 1st of the month named by a `YYYY/MM` directory pair.
///
/// The deepest matching pair wins.
pub fn from_directories(file_path: &Path) -> Option<DateTime<Local>> {
    let parent = file_path.parent()?;
    let segments: Vec<&str> = parent
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    segments.windows(2).rev().find_map(|pair| {
        let (year, month) = (pair[0], pair[1]);
        if !is_digits(year, 4) || !is_digits(month, 2) {
            return None;
        }
        local_noon(year.parse().ok()?, month.parse().ok()?, 1)
    })
}

fn is_digits(segment: &str, len: usize) -> bool {
    segment.len() == len && segment.bytes().all(|b| b.is_ascii_digit())
}

// Noon keeps the calendar day stable across timezone conversions.
fn local_noon(year: i32, month: u32, day: u32) -> Option<DateTime<Local>> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(12, 0, 0)?;
    Local.from_local_datetime(&naive).earliest()
}
