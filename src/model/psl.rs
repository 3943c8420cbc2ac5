//! The PSL ("private shipping label") column: a user-entered value per order row that must survive
//! each sync's overwrite of the `Orders` tab.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PSL_COLUMN: &str = "G";
pub const PSL_FIRST_ROW: usize = 2;
pub const PSL_LAST_ROW: usize = 100;

/// Values of the PSL column keyed by 1-based sheet row number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PslValues(BTreeMap<usize, String>);

impl PslValues {
    /// Builds the map from a column read that starts at `first_row`. Empty and zero values are
    /// dropped.
    pub fn from_column(first_row: usize, column: &[Vec<String>]) -> Self {
        let mut values = BTreeMap::new();
        for (offset, row) in column.iter().enumerate() {
            if let Some(value) = row.first() {
                if is_kept(value) {
                    values.insert(first_row + offset, value.clone());
                }
            }
        }
        Self(values)
    }

    pub fn insert(&mut self, row: usize, value: impl Into<String>) {
        self.0.insert(row, value.into());
    }

    pub fn get(&self, row: usize) -> Option<&str> {
        self.0.get(&row).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.0.iter().map(|(row, value)| (*row, value.as_str()))
    }
}

/// True when a PSL cell holds a real value: non-empty and not a zero such as `$0` or `0`.
pub fn is_kept(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    let stripped: String = trimmed
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();
    stripped != "0"
}

/// What gets written to `.backups/psl.*.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PslBackup {
    pub taken_at: DateTime<Utc>,
    pub sheet: String,
    pub column: String,
    pub values: PslValues,
}

impl PslBackup {
    pub fn new(sheet: impl Into<String>, values: PslValues) -> Self {
        Self {
            taken_at: Utc::now(),
            sheet: sheet.into(),
            column: PSL_COLUMN.to_string(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(values: &[&str]) -> Vec<Vec<String>> {
        values
            .iter()
            .map(|v| {
                if v.is_empty() {
                    Vec::new()
                } else {
                    vec![v.to_string()]
                }
            })
            .collect()
    }

    #[test]
    fn test_from_column_keeps_real_values() {
        let values = PslValues::from_column(2, &col(&["4.85", "", "0", "$0", "XYZ", " $1,0 "]));
        assert_eq!(values.len(), 3);
        assert_eq!(values.get(2), Some("4.85"));
        assert_eq!(values.get(3), None);
        assert_eq!(values.get(4), None);
        assert_eq!(values.get(6), Some("XYZ"));
        assert_eq!(values.get(7), Some(" $1,0 "));
    }

    #[test]
    fn test_is_kept() {
        assert!(!is_kept(""));
        assert!(!is_kept("   "));
        assert!(!is_kept("$0"));
        assert!(!is_kept(" 0 "));
        assert!(is_kept("0.00"));
        assert!(is_kept("label"));
    }

    #[test]
    fn test_backup_json_shape() {
        let mut values = PslValues::default();
        values.insert(5, "4.85");
        let backup = PslBackup::new("Orders", values);
        let json = serde_json::to_value(&backup).unwrap();
        assert_eq!(json["sheet"], "Orders");
        assert_eq!(json["column"], "G");
        assert_eq!(json["values"]["5"], "4.85");
        let back: PslBackup = serde_json::from_value(json).unwrap();
        assert_eq!(back, backup);
    }
}
