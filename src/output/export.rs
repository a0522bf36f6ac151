//! Identifier export: turns a result CSV into identifier lists
//!
//! Crawls chain through files: race results name horses, jockeys and
//! trainers, whose ids feed the next job's `ids-file`. This module pulls the
//! distinct values of named columns out of a result file.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{path} is empty")]
    EmptyInput { path: PathBuf },

    #[error("column '{column}' not found in {path}")]
    MissingColumn { column: String, path: PathBuf },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Distinct values of one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnValues {
    pub column: String,
    pub values: Vec<String>,
}

/// Collects the distinct non-empty values of each requested column
///
/// Values are sorted numerically when every value is made of digits,
/// lexicographically otherwise. Rows too short for a requested column are
/// skipped for that column.
pub fn collect_columns(input: &Path, columns: &[String]) -> Result<Vec<ColumnValues>, ExportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(input)?;

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(ExportError::EmptyInput {
            path: input.to_path_buf(),
        });
    }

    let indexes = columns
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == column)
                .ok_or_else(|| ExportError::MissingColumn {
                    column: column.clone(),
                    path: input.to_path_buf(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut sets = vec![BTreeSet::new(); columns.len()];
    for result in reader.records() {
        let record = result?;
        for (set, &index) in sets.iter_mut().zip(&indexes) {
            if let Some(value) = record.get(index).map(str::trim).filter(|v| !v.is_empty()) {
                set.insert(value.to_string());
            }
        }
    }

    Ok(columns
        .iter()
        .zip(sets)
        .map(|(column, set)| ColumnValues {
            column: column.clone(),
            values: sort_ids(set),
        })
        .collect())
}

fn sort_ids(values: BTreeSet<String>) -> Vec<String> {
    let mut values: Vec<String> = values.into_iter().collect();
    if values.iter().all(|v| v.bytes().all(|b| b.is_ascii_digit())) {
        // Numeric order without overflow: shorter digit strings are smaller
        values.sort_by(|a, b| {
            let (a, b) = (a.trim_start_matches('0'), b.trim_start_matches('0'));
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        });
    }
    values
}

/// Writes one identifier list as a one-column CSV
pub fn write_ids<W: io::Write>(writer: W, ids: &ColumnValues, header: bool) -> Result<(), ExportError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    if header {
        writer.write_record([ids.column.as_str()])?;
    }
    for value in &ids.values {
        writer.write_record([value.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Exports each column to `<output_dir>/<column>.csv`
///
/// # Arguments
///
/// * `input` - Result CSV with a header row
/// * `columns` - Column names to export
/// * `output_dir` - Target directory; the input's directory when `None`
/// * `header` - Whether to write the column name as the first row
///
/// # Returns
///
/// The written files with their value counts
pub fn export_ids(
    input: &Path,
    columns: &[String],
    output_dir: Option<&Path>,
    header: bool,
) -> Result<Vec<(PathBuf, usize)>, ExportError> {
    let output_dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&output_dir)?;

    let mut written = Vec::new();
    for ids in collect_columns(input, columns)? {
        let path = output_dir.join(format!("{}.csv", ids.column));
        let file = std::fs::File::create(&path)?;
        write_ids(file, &ids, header)?;
        tracing::info!("Wrote {} ({} ids)", path.display(), ids.values.len());
        written.push((path, ids.values.len()));
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RESULTS: &str = "\
race_id,rank,horse_id,jockey_id,trainer_id
202405021011,1,2021105898,01170,01061
202405021011,2,2021104455,05339,01157
202406050811,1,2021105898,01170,
202406050811,2,9,05339,01061
";

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn input(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("race_result.csv");
        std::fs::write(&path, RESULTS).unwrap();
        path
    }

    #[test]
    fn test_collect_distinct_sorted() {
        let dir = TempDir::new().unwrap();
        let result = collect_columns(&input(&dir), &columns(&["horse_id", "trainer_id"])).unwrap();

        assert_eq!(result[0].values, vec!["9", "2021104455", "2021105898"]);
        // Empty cells are dropped
        assert_eq!(result[1].values, vec!["01061", "01157"]);
    }

    #[test]
    fn test_missing_column() {
        let dir = TempDir::new().unwrap();
        let err = collect_columns(&input(&dir), &columns(&["owner_id"])).unwrap_err();
        assert!(matches!(err, ExportError::MissingColumn { .. }));
    }

    #[test]
    fn test_non_numeric_values_sort_lexicographically() {
        let set: BTreeSet<String> = ["b", "10", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(sort_ids(set), vec!["10", "a", "b"]);
    }

    #[test]
    fn test_export_writes_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("ids");
        let written = export_ids(&input(&dir), &columns(&["jockey_id"]), Some(&out), true).unwrap();

        assert_eq!(written, vec![(out.join("jockey_id.csv"), 2)]);
        let content = std::fs::read_to_string(out.join("jockey_id.csv")).unwrap();
        assert_eq!(content, "jockey_id\n01170\n05339\n");
    }

    #[test]
    fn test_export_without_header_next_to_input() {
        let dir = TempDir::new().unwrap();
        export_ids(&input(&dir), &columns(&["horse_id"]), None, false).unwrap();

        let content = std::fs::read_to_string(dir.path().join("horse_id.csv")).unwrap();
        assert_eq!(content, "9\n2021104455\n2021105898\n");
    }
}
