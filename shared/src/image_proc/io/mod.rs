//! Plain-text array I/O for donut template files.
//!
//! Templates are stored as whitespace-delimited numeric tables, one image row
//! per line. Blank lines and lines starting with `#` are skipped. Every row
//! must have the same number of columns.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2};
use thiserror::Error;

/// Errors from reading or writing text arrays.
#[derive(Error, Debug)]
pub enum TextArrayError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}:{line}: cannot parse '{token}' as a number")]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },

    #[error("{path}:{line}: expected {expected} columns, found {found}")]
    RaggedRow {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("{path}: no data rows")]
    Empty { path: PathBuf },
}

/// Read a whitespace-delimited 2D array.
pub fn read_text_array<P: AsRef<Path>>(path: P) -> Result<Array2<f64>, TextArrayError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| TextArrayError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut values = Vec::new();
    let mut cols: Option<usize> = None;
    let mut rows = 0;

    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let start = values.len();
        for token in trimmed.split_whitespace() {
            let v: f64 = token.parse().map_err(|_| TextArrayError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                token: token.to_string(),
            })?;
            values.push(v);
        }

        let found = values.len() - start;
        match cols {
            None => cols = Some(found),
            Some(expected) if expected != found => {
                return Err(TextArrayError::RaggedRow {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    expected,
                    found,
                })
            }
            Some(_) => {}
        }
        rows += 1;
    }

    let cols = cols.ok_or_else(|| TextArrayError::Empty {
        path: path.to_path_buf(),
    })?;

    Array2::from_shape_vec((rows, cols), values).map_err(|_| TextArrayError::Empty {
        path: path.to_path_buf(),
    })
}

/// Write a 2D array as whitespace-delimited text.
pub fn write_text_array<P: AsRef<Path>>(
    array: &ArrayView2<f64>,
    path: P,
) -> Result<(), TextArrayError> {
    let path = path.as_ref();
    let to_err = |source| TextArrayError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = fs::File::create(path).map_err(to_err)?;
    let mut writer = BufWriter::new(file);
    for row in array.rows() {
        let line = row
            .iter()
            .map(|v| format!("{v:e}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{line}").map_err(to_err)?;
    }
    writer.flush().map_err(to_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_with_comments_and_blank_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# template").unwrap();
        writeln!(file, "0 1.5 2").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  3\t4e1   -5").unwrap();
        let array = read_text_array(file.path()).unwrap();
        assert_eq!(array.dim(), (2, 3));
        assert_eq!(array[[0, 1]], 1.5);
        assert_eq!(array[[1, 1]], 40.0);
        assert_eq!(array[[1, 2]], -5.0);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("array.txt");
        let array = Array2::from_shape_fn((3, 4), |(r, c)| r as f64 * 0.1 + c as f64);
        write_text_array(&array.view(), &path).unwrap();
        assert_eq!(read_text_array(&path).unwrap(), array);
    }

    #[test]
    fn test_ragged_and_bad_tokens() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1 2 3").unwrap();
        writeln!(file, "4 5").unwrap();
        match read_text_array(file.path()) {
            Err(TextArrayError::RaggedRow {
                line,
                expected,
                found,
                ..
            }) => assert_eq!((line, expected, found), (2, 3, 2)),
            other => panic!("unexpected result: {other:?}"),
        }

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1 two 3").unwrap();
        assert!(matches!(
            read_text_array(file.path()),
            Err(TextArrayError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_text_array("/nonexistent/template.txt"),
            Err(TextArrayError::Io { .. })
        ));
    }
}
