use crate::error::{GsvmError, Result};
use crate::individual::FeatureMask;
use log::info;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Labeled numeric dataset, read-only once loaded
#[derive(Clone, PartialEq)]
pub struct Data {
    /// Row-major matrix: one row per sample, one column per feature
    pub X: Vec<Vec<f64>>,
    /// Class label of each row
    pub y: Vec<i32>,
    /// Distinct labels, ascending
    pub labels: Vec<i32>,
    pub feature_len: usize,
    pub sample_len: usize,
}

/// Non-blank lines that are not `#` comments, trimmed
fn content_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| GsvmError::input(path, e.to_string()))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push(trimmed.to_string());
    }
    Ok(lines)
}

impl Data {
    /// Create a new `Data` instance with default values
    pub fn new() -> Data {
        Data {
            X: Vec::new(),
            y: Vec::new(),
            labels: Vec::new(),
            feature_len: 0,
            sample_len: 0,
        }
    }

    /// Builds a dataset from memory, computing the label set
    pub fn from_parts(X: Vec<Vec<f64>>, y: Vec<i32>) -> Data {
        let mut data = Data::new();
        data.feature_len = X.first().map(|row| row.len()).unwrap_or(0);
        data.sample_len = X.len();
        data.X = X;
        data.set_y(y);
        data
    }

    fn set_y(&mut self, y: Vec<i32>) {
        let labels: BTreeSet<i32> = y.iter().copied().collect();
        self.labels = labels.into_iter().collect();
        self.y = y;
    }

    /// Loads the index file (one integer label per line) and the matrix file
    /// (whitespace-separated values, one row per line), optionally keeping only
    /// the columns selected by `restriction`.
    pub fn load_data<P: AsRef<Path>>(&mut self, index_path: P, matrix_path: P, restriction: Option<&FeatureMask>) -> Result<()> {
        let index_path = index_path.as_ref();
        let matrix_path = matrix_path.as_ref();
        info!("Loading files {} and {}...", index_path.display(), matrix_path.display());

        let mut y = Vec::new();
        for line in content_lines(index_path)? {
            let label: i32 = line
                .parse()
                .map_err(|_| GsvmError::input(index_path, format!("'{}' is not an integer label", line)))?;
            y.push(label);
        }

        let mut X: Vec<Vec<f64>> = Vec::new();
        for (row, line) in content_lines(matrix_path)?.into_iter().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if let Some(mask) = restriction {
                if mask.len() != fields.len() {
                    return Err(GsvmError::input(
                        matrix_path,
                        format!(
                            "row {} has {} columns but the feature restriction has {}",
                            row + 1,
                            fields.len(),
                            mask.len()
                        ),
                    ));
                }
            }

            let mut values = Vec::with_capacity(fields.len());
            for (column, field) in fields.iter().enumerate() {
                if restriction.map_or(true, |mask| mask.is_selected(column)) {
                    let value: f64 = field.parse().map_err(|_| {
                        GsvmError::input(matrix_path, format!("row {}: '{}' is not a number", row + 1, field))
                    })?;
                    values.push(value);
                }
            }

            if let Some(first) = X.first() {
                if first.len() != values.len() {
                    return Err(GsvmError::input(matrix_path, "Data Matrix contains rows of differing size"));
                }
            }
            X.push(values);
        }

        if X.is_empty() {
            return Err(GsvmError::input(matrix_path, "no data rows"));
        }
        if X.len() != y.len() {
            return Err(GsvmError::input(
                index_path,
                format!("Number of rows of data matrix ({}) and index ({}) differ!", X.len(), y.len()),
            ));
        }

        self.feature_len = X[0].len();
        self.sample_len = X.len();
        self.X = X;
        self.set_y(y);

        if self.feature_len == 0 {
            return Err(GsvmError::input(matrix_path, "no feature left to select"));
        }
        Ok(())
    }

    /// Column values of `row` for the selected features, in column order
    pub fn selected_values<'a>(&'a self, row: usize, mask: &'a FeatureMask) -> impl Iterator<Item = f64> + 'a {
        self.X[row]
            .iter()
            .enumerate()
            .filter(move |(column, _)| mask.is_selected(*column))
            .map(|(_, value)| *value)
    }

    /// Number of rows per label, in label order
    pub fn label_counts(&self) -> Vec<(i32, usize)> {
        self.labels
            .iter()
            .map(|label| (*label, self.y.iter().filter(|y| *y == label).count()))
            .collect()
    }
}

/// Reads a feature restriction: the first meaningful line, `0`/`1` characters only
pub fn load_feature_restriction<P: AsRef<Path>>(path: P) -> Result<FeatureMask> {
    let path = path.as_ref();
    let lines = content_lines(path)?;
    let first = lines
        .first()
        .ok_or_else(|| GsvmError::input(path, "empty feature file"))?;
    first
        .parse::<FeatureMask>()
        .map_err(|e| GsvmError::input(path, e.to_string()))
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<String> = self
            .label_counts()
            .iter()
            .map(|(label, count)| format!("{}:{}", label, count))
            .collect();
        write!(
            f,
            "Data: {} samples x {} features, labels [{}]",
            self.sample_len,
            self.feature_len,
            counts.join(", ")
        )
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
