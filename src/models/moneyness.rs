//! Strike-label to moneyness lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of the strike vocabulary, e.g. `"ATM - $0.50"` -> `-0.50`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneynessEntry {
    pub label: String,
    pub offset: f64,
}

impl MoneynessEntry {
    pub fn new(label: impl Into<String>, offset: f64) -> Self {
        Self {
            label: label.into(),
            offset,
        }
    }
}

/// Lookup from a record's `Type` label to its signed offset from the
/// at-the-money strike. Labels are matched trimmed and case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct MoneynessTable {
    offsets: HashMap<String, f64>,
}

impl MoneynessTable {
    pub fn new(entries: &[MoneynessEntry]) -> Self {
        let offsets = entries
            .iter()
            .map(|e| (normalize_label(&e.label), e.offset))
            .collect();
        Self { offsets }
    }

    /// `None` means the label is outside the vocabulary and the row must not
    /// take part in a surface pivot.
    pub fn lookup(&self, label: &str) -> Option<f64> {
        self.offsets.get(&normalize_label(label)).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

fn normalize_label(label: &str) -> String {
    label.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Vocabulary;

    #[test]
    fn default_vocabulary_offsets() {
        let table = MoneynessTable::new(&Vocabulary::default().moneyness);
        assert_eq!(table.lookup("ATM"), Some(0.0));
        assert_eq!(table.lookup("ATM - $0.50"), Some(-0.50));
        assert_eq!(table.lookup("ATM + $0.25"), Some(0.25));
        assert_eq!(table.lookup("ATM + $2.00"), Some(2.0));
        assert_eq!(table.lookup("atm - $1.00 "), Some(-1.0));
    }

    #[test]
    fn unknown_labels_are_undefined() {
        let table = MoneynessTable::new(&Vocabulary::default().moneyness);
        assert_eq!(table.lookup("HIST"), None);
        assert_eq!(table.lookup("ATM + $3.00"), None);
        assert_eq!(table.lookup(""), None);
    }
}
