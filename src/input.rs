//! Loading address records from files.
//!
//! `.csv` files are spreadsheet exports with a header row (`address`, `name`,
//! `contact`, `category` or `IconColor`; capitalized headers are accepted).
//! `.json` files hold an array of record objects. Anything else is read as
//! plain text, one address per line; blank lines and `#` comments are skipped.

use crate::location::AddressRecord;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid address list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid CSV address list: {0}")]
    Csv(#[from] csv::Error),

    #[error("record {index} has a blank address")]
    BlankAddress { index: usize },
}

pub fn load_records(path: &Path) -> Result<Vec<AddressRecord>, InputError> {
    let data = fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("csv") => parse_csv(&data),
        Some("json") => parse_json(&data),
        _ => Ok(parse_lines(&data)),
    }
}

/// Parse a JSON array of records. Every record needs a non-blank address.
pub fn parse_json(data: &str) -> Result<Vec<AddressRecord>, InputError> {
    let records: Vec<AddressRecord> = serde_json::from_str(data)?;
    check_addresses(records)
}

/// Parse CSV with a header row. Cells are trimmed; empty optional cells are
/// treated as absent and unknown columns are ignored.
pub fn parse_csv(data: &str) -> Result<Vec<AddressRecord>, InputError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());
    let records = reader
        .deserialize::<AddressRecord>()
        .collect::<Result<Vec<_>, _>>()?;
    check_addresses(records)
}

fn check_addresses(records: Vec<AddressRecord>) -> Result<Vec<AddressRecord>, InputError> {
    if let Some(index) = records.iter().position(|r| r.address.trim().is_empty()) {
        return Err(InputError::BlankAddress { index });
    }
    Ok(records)
}

pub fn parse_lines(data: &str) -> Vec<AddressRecord> {
    data.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(AddressRecord::new)
        .collect()
}
