use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::error::{Result, SimError};

// A convenience type for parsing csv data
pub type Row = HashMap<String, String>;

pub fn str_to_absolute_path(path_str: &str, default_base_dir: &Path) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        return path;
    } else {
        return [default_base_dir, Path::new(&path)].iter().collect();
    }
}

/// Reads every row of a headed csv file into a column-name -> value map.
pub fn read_csv_rows(path: &Path) -> Result<Vec<Row>> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);
    let mut rows = vec![];
    for result in reader.deserialize() {
        let row: Row = result?;
        rows.push(row);
    }
    log::debug!("read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Parses the named column of a row, naming the column in the error.
pub fn parse_field<T: FromStr>(row: &Row, key: &str) -> Result<T> {
    let raw = row
        .get(key)
        .ok_or_else(|| SimError::Parse(format!("missing column \"{}\"", key)))?;
    raw.parse()
        .map_err(|_| SimError::Parse(format!("bad value \"{}\" in column \"{}\"", raw, key)))
}
