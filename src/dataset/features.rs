//! Feature table loading and normalization.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DataLoadError {
    #[error("Failed to read feature table {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error(
        "Feature table {path} needs feature columns followed by label and filename (found {columns} columns)"
    )]
    TooFewColumns { path: PathBuf, columns: usize },
    #[error("Feature table {path} has no rows")]
    Empty { path: PathBuf },
    #[error("Invalid value {value:?} for column {column} at line {line} of {path}")]
    InvalidValue {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },
    #[error("Row {identifier} has {found} features (expected {expected})")]
    RaggedRow {
        identifier: String,
        expected: usize,
        found: usize,
    },
}

/// A single flight's feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// Re-rooted flight file path, unique within a store.
    pub identifier: String,
    /// Normalized feature values in column order.
    pub features: Vec<f64>,
    /// Provisional class index from the table's label column (e.g. a cluster id).
    pub label: Option<usize>,
}

/// Working set of unique, normalized feature rows keyed by identifier.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    feature_names: Vec<String>,
    rows: Vec<FeatureRow>,
    index: HashMap<String, usize>,
}

impl FeatureStore {
    /// Load a feature table and re-root its identifiers onto `data_dir`.
    ///
    /// The last two columns are the provisional label and the original file path; every
    /// earlier column is a numeric feature. Rows are de-duplicated by re-rooted identifier
    /// (first occurrence wins) before the feature transform is applied.
    pub fn load(path: &Path, data_dir: &Path) -> Result<Self, DataLoadError> {
        let csv_err = |source| DataLoadError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;
        let headers = reader.headers().map_err(csv_err)?.clone();
        if headers.len() < 3 {
            return Err(DataLoadError::TooFewColumns {
                path: path.to_path_buf(),
                columns: headers.len(),
            });
        }
        let dim = headers.len() - 2;
        let feature_names: Vec<String> = headers.iter().take(dim).map(str::to_string).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            let line = record.position().map(|pos| pos.line()).unwrap_or(0);
            let invalid = |column: &str, value: &str| DataLoadError::InvalidValue {
                path: path.to_path_buf(),
                line,
                column: column.to_string(),
                value: value.to_string(),
            };
            let mut features = Vec::with_capacity(dim);
            for (name, cell) in feature_names.iter().zip(record.iter()) {
                let value = cell.parse::<f64>().map_err(|_| invalid(name, cell))?;
                features.push(value);
            }
            let label_cell = record.get(dim).unwrap_or_default();
            let label = parse_provisional_label(label_cell)
                .ok_or_else(|| invalid(&headers[dim], label_cell))?;
            let original = record.get(dim + 1).unwrap_or_default();
            rows.push(FeatureRow {
                identifier: reroot_identifier(data_dir, original),
                features,
                label,
            });
        }
        if rows.is_empty() {
            return Err(DataLoadError::Empty {
                path: path.to_path_buf(),
            });
        }
        let store = Self::from_rows(feature_names, rows)?;
        info!(
            path = %path.display(),
            rows = store.len(),
            features = store.dim(),
            "Loaded feature table"
        );
        Ok(store)
    }

    /// Build a store from raw (untransformed) rows, applying de-duplication and the
    /// feature transform exactly as [`FeatureStore::load`] does.
    pub fn from_rows(
        feature_names: Vec<String>,
        rows: Vec<FeatureRow>,
    ) -> Result<Self, DataLoadError> {
        let dim = feature_names.len();
        let total = rows.len();
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(total);
        for row in rows {
            if row.features.len() != dim {
                return Err(DataLoadError::RaggedRow {
                    identifier: row.identifier,
                    expected: dim,
                    found: row.features.len(),
                });
            }
            if seen.insert(row.identifier.clone()) {
                unique.push(row);
            }
        }
        if unique.len() < total {
            debug!(dropped = total - unique.len(), "Dropped duplicate identifiers");
        }
        transform_features(&mut unique, dim);
        Ok(Self::from_transformed(feature_names, unique))
    }

    fn from_transformed(feature_names: Vec<String>, rows: Vec<FeatureRow>) -> Self {
        let index = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (row.identifier.clone(), idx))
            .collect();
        Self {
            feature_names,
            rows,
            index,
        }
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Number of feature columns.
    pub fn dim(&self) -> usize {
        self.feature_names.len()
    }

    pub fn get(&self, identifier: &str) -> Option<&FeatureRow> {
        self.index.get(identifier).map(|&idx| &self.rows[idx])
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    /// Identifiers in working-set order, for display collaborators.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.identifier.as_str())
    }

    /// Stack the given rows into a `rows x dim` matrix.
    pub fn matrix(&self, rows: &[&FeatureRow]) -> Array2<f64> {
        Array2::from_shape_fn((rows.len(), self.dim()), |(r, c)| rows[r].features[c])
    }

    /// Take the rows with the given identifiers out of the store.
    pub fn remove(&mut self, identifiers: &HashSet<&str>) -> Vec<FeatureRow> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.rows)
            .into_iter()
            .partition(|row| identifiers.contains(row.identifier.as_str()));
        let names = std::mem::take(&mut self.feature_names);
        *self = Self::from_transformed(names, kept);
        removed
    }
}

/// Map an original flight path onto `data_dir`, keeping only its file name.
///
/// Both `/` and `\` are treated as separators so tables captured on another OS
/// re-root the same way.
pub fn reroot_identifier(data_dir: &Path, original: &str) -> String {
    let base = original
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(original);
    data_dir.join(base).to_string_lossy().into_owned()
}

/// `Some(None)` for empty or negative cells, `Some(Some(idx))` for integral values,
/// `None` when the cell is not a usable label.
fn parse_provisional_label(cell: &str) -> Option<Option<usize>> {
    if cell.is_empty() {
        return Some(None);
    }
    let value = cell.parse::<f64>().ok()?;
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    if value < 0.0 {
        return Some(None);
    }
    Some(Some(value as usize))
}

/// Standardize each column, then negate and exponentiate it.
fn transform_features(rows: &mut [FeatureRow], dim: usize) {
    if rows.is_empty() || dim == 0 {
        return;
    }
    let mut matrix = Array2::from_shape_fn((rows.len(), dim), |(r, c)| rows[r].features[c]);
    for mut column in matrix.columns_mut() {
        let mean = column.mean().unwrap_or(0.0);
        let std = column.std(0.0);
        // Constant columns are only centered.
        let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };
        column.mapv_inplace(|value| (-(value - mean) / scale).exp());
    }
    for (row, values) in rows.iter_mut().zip(matrix.rows()) {
        row.features = values.to_vec();
    }
    debug!(rows = rows.len(), dim, "Transformed feature columns");
}
