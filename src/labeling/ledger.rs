//! Identifier to label-index ledger with CSV persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use super::{LabelRecord, LabelSet};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read labels from {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },
    #[error("Failed to write labels to {path}: {source}")]
    Write { path: PathBuf, source: csv::Error },
    #[error("Failed to flush labels to {path}: {source}")]
    Flush {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unable to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Label file {path} has no rows")]
    NoRows { path: PathBuf },
    #[error("Label index {index} has no name ({available} labels defined)")]
    UnknownLabel { index: usize, available: usize },
}

/// Human-confirmed labels keyed by flight identifier.
///
/// Entries only change through [`LabelLedger::merge`] (upsert) or wholesale through
/// [`LabelLedger::reset`] and [`LabelLedger::load`]. Iteration is in identifier order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelLedger {
    entries: BTreeMap<String, usize>,
}

impl LabelLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert pairs; a later pair for the same identifier overwrites an earlier one.
    pub fn merge<I, S>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        for (identifier, label) in pairs {
            self.entries.insert(identifier.into(), label);
        }
    }

    /// Split the ledger into parallel identifier and label vectors.
    ///
    /// Returns `None` when nothing has been labeled yet.
    pub fn as_training_pairs(&self) -> Option<(Vec<String>, Vec<usize>)> {
        if self.entries.is_empty() {
            return None;
        }
        Some(
            self.entries
                .iter()
                .map(|(identifier, &label)| (identifier.clone(), label))
                .unzip(),
        )
    }

    pub fn get(&self, identifier: &str) -> Option<usize> {
        self.entries.get(identifier).copied()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries
            .iter()
            .map(|(identifier, &label)| (identifier.as_str(), label))
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Write `filename,label` rows, translating indices to names through `labels`.
    pub fn persist(&self, path: &Path, labels: &LabelSet) -> Result<(), LedgerError> {
        let records = self
            .iter()
            .map(|(identifier, index)| {
                let name = labels.name(index).ok_or(LedgerError::UnknownLabel {
                    index,
                    available: labels.len(),
                })?;
                Ok(LabelRecord {
                    filename: identifier.to_string(),
                    label: name.to_string(),
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let write_err = |source| LedgerError::Write {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = csv::Writer::from_path(path).map_err(write_err)?;
        if records.is_empty() {
            writer
                .write_record([crate::dataset::FILENAME_COLUMN, crate::dataset::LABEL_COLUMN])
                .map_err(write_err)?;
        }
        for record in &records {
            writer.serialize(record).map_err(write_err)?;
        }
        writer.flush().map_err(|source| LedgerError::Flush {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), rows = records.len(), "Saved labels");
        Ok(())
    }

    /// Replace the ledger and `labels` with the contents of a label file.
    ///
    /// Label indices are assigned to the distinct names in the file in first-seen
    /// order, so the caller's label ordering is discarded. On any failure the ledger
    /// and `labels` are left untouched and `false` is returned.
    pub fn load(&mut self, path: &Path, labels: &mut LabelSet) -> bool {
        match read_label_file(path) {
            Ok((names, entries)) => {
                if names != *labels {
                    warn!(
                        previous = ?labels.names(),
                        loaded = ?names.names(),
                        "Label file redefines the label set"
                    );
                }
                info!(path = %path.display(), rows = entries.len(), "Loaded labels");
                *labels = names;
                self.entries = entries;
                true
            }
            Err(err) => {
                warn!("{err}");
                false
            }
        }
    }
}

fn read_label_file(path: &Path) -> Result<(LabelSet, BTreeMap<String, usize>), LedgerError> {
    let read_err = |source| LedgerError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(read_err)?;
    let mut names: Vec<String> = Vec::new();
    let mut entries = BTreeMap::new();
    for record in reader.deserialize::<LabelRecord>() {
        let record = record.map_err(read_err)?;
        let index = match names.iter().position(|name| *name == record.label) {
            Some(index) => index,
            None => {
                names.push(record.label);
                names.len() - 1
            }
        };
        entries.insert(record.filename, index);
    }
    if entries.is_empty() {
        return Err(LedgerError::NoRows {
            path: path.to_path_buf(),
        });
    }
    Ok((LabelSet::new(names), entries))
}
