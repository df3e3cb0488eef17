//! Label names and human-confirmed labels.
//!
//! A [`LabelSet`] fixes the meaning of every label index; the [`LabelLedger`] records
//! which flights the human has labeled so far.

pub mod ledger;

pub use ledger::{LabelLedger, LedgerError};

use serde::{Deserialize, Serialize};

/// One `filename,label` row of a label export, import or validation file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub filename: String,
    /// Label name, not index.
    pub label: String,
}

/// Ordered label names; a name's position is its label index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Index of the first label with exactly this name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }
}
