//! Manual overrides: values entered by a person against an order that must survive re-syncs.

use crate::model::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MANUAL_OVERRIDES_TAB: &str = "MANUAL_OVERRIDES";

pub const MANUAL_OVERRIDES_HEADERS: [&str; 7] = [
    "order_id",
    "order_number",
    "shipping_label_cost",
    "psl",
    "notes",
    "updated_by",
    "updated_at",
];

/// The override record for one order, keyed by the Shopify order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub order_id: String,
    pub order_number: String,
    pub shipping_label_cost: Option<Amount>,
    pub psl: Option<String>,
    pub notes: Option<String>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// A change to an override. `None` fields leave the stored value alone. `note` is appended to
/// the existing notes rather than replacing them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideUpdate {
    pub order_number: Option<String>,
    pub shipping_label_cost: Option<Amount>,
    pub psl: Option<String>,
    pub note: Option<String>,
    pub updated_by: String,
}

impl OverrideUpdate {
    pub fn new(updated_by: impl Into<String>) -> Self {
        Self {
            updated_by: updated_by.into(),
            ..Default::default()
        }
    }

    pub fn order_number(mut self, order_number: impl Into<String>) -> Self {
        self.order_number = Some(order_number.into());
        self
    }

    pub fn shipping_label_cost(mut self, cost: Amount) -> Self {
        self.shipping_label_cost = Some(cost);
        self
    }

    pub fn psl(mut self, psl: impl Into<String>) -> Self {
        self.psl = Some(psl.into());
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl ManualOverride {
    /// Applies `update` on top of `existing` (if any) and stamps the result with `now`.
    pub fn merge(
        order_id: &str,
        existing: Option<ManualOverride>,
        update: OverrideUpdate,
        now: DateTime<Utc>,
    ) -> ManualOverride {
        let mut merged = existing.unwrap_or_else(|| ManualOverride {
            order_id: order_id.to_string(),
            order_number: String::new(),
            shipping_label_cost: None,
            psl: None,
            notes: None,
            updated_by: String::new(),
            updated_at: now,
        });
        if let Some(number) = update.order_number.filter(|n| !n.is_empty()) {
            merged.order_number = number;
        }
        if let Some(cost) = update.shipping_label_cost {
            merged.shipping_label_cost = Some(cost);
        }
        if let Some(psl) = update.psl {
            merged.psl = Some(psl);
        }
        if let Some(note) = update.note.filter(|n| !n.trim().is_empty()) {
            merged.notes = Some(match merged.notes.take().filter(|n| !n.is_empty()) {
                Some(existing) => format!("{existing}\n{note}"),
                None => note,
            });
        }
        merged.updated_by = update.updated_by;
        merged.updated_at = now;
        merged
    }

    /// The row published to the `MANUAL_OVERRIDES` tab.
    pub fn sheet_values(&self) -> Vec<String> {
        vec![
            self.order_id.clone(),
            self.order_number.clone(),
            self.shipping_label_cost
                .map(|c| c.value().to_string())
                .unwrap_or_default(),
            self.psl.clone().unwrap_or_default(),
            self.notes.clone().unwrap_or_default(),
            self.updated_by.clone(),
            self.updated_at.to_rfc3339(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_merge_new_record() {
        let update = OverrideUpdate::new("cli")
            .order_number("#1042")
            .shipping_label_cost(Amount::from_cell("4.85"));
        let merged = ManualOverride::merge("5001", None, update, at(1));
        assert_eq!(merged.order_id, "5001");
        assert_eq!(merged.order_number, "#1042");
        assert_eq!(merged.shipping_label_cost, Some(Amount::from_cell("4.85")));
        assert_eq!(merged.psl, None);
        assert_eq!(merged.updated_by, "cli");
    }

    #[test]
    fn test_merge_keeps_absent_fields_and_appends_notes() {
        let first = ManualOverride::merge(
            "5001",
            None,
            OverrideUpdate::new("a").psl("XYZ").note("USPS ground"),
            at(1),
        );
        let second = ManualOverride::merge(
            "5001",
            Some(first),
            OverrideUpdate::new("b")
                .shipping_label_cost(Amount::from_cell("3.10"))
                .note("left at door"),
            at(2),
        );
        assert_eq!(second.psl.as_deref(), Some("XYZ"));
        assert_eq!(second.notes.as_deref(), Some("USPS ground\nleft at door"));
        assert_eq!(second.updated_by, "b");
        assert_eq!(second.updated_at, at(2));
    }

    #[test]
    fn test_sheet_values() {
        let merged = ManualOverride::merge(
            "5001",
            None,
            OverrideUpdate::new("ops").psl("XYZ"),
            at(3),
        );
        let values = merged.sheet_values();
        assert_eq!(values.len(), MANUAL_OVERRIDES_HEADERS.len());
        assert_eq!(values[2], "");
        assert_eq!(values[3], "XYZ");
        assert_eq!(values[6], "2024-05-01T03:00:00+00:00");
    }
}
