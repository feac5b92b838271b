//! Acquisition dates available in the L1C archive

use crate::error::{AlcdError, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use time::macros::format_description;
use time::Date;

/// Parse a `YYYYMMDD` calendar date
pub fn parse_date(value: &str) -> Result<Date> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AlcdError::config(format!(
            "date `{}` must be in YYYYMMDD format",
            value
        )));
    }
    Date::parse(value, format_description!("[year][month][day]")).map_err(|_| {
        AlcdError::config(format!("date `{}` is not a valid calendar date", value))
    })
}

/// Dates of every `S2*.SAFE` product under `<l1c_root>/<location>`, sorted
pub fn available_dates(l1c_root: &Path, location: &str) -> Result<Vec<String>> {
    let dir = l1c_root.join(location);
    if !dir.is_dir() {
        return Err(AlcdError::config(format!(
            "no L1C directory for location `{}` at {}",
            location,
            dir.display()
        )));
    }
    let token = Regex::new(r"_(20[0-9]{6})").map_err(|e| AlcdError::config(e.to_string()))?;

    let mut dates = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !(name.starts_with("S2") && name.ends_with(".SAFE") && entry.path().is_dir()) {
            continue;
        }
        dates.extend(token.captures_iter(&name).map(|c| c[1].to_string()));
    }
    dates.sort();
    dates.dedup();
    Ok(dates)
}

/// Whether a product for `date` exists for the location
pub fn is_valid_date(l1c_root: &Path, location: &str, date: &str) -> Result<bool> {
    parse_date(date)?;
    Ok(available_dates(l1c_root, location)?.iter().any(|d| d == date))
}
