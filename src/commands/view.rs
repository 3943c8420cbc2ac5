//! The `ORDERS_VIEW` tab: every `RAW_ORDERS` row joined to `MANUAL_OVERRIDES` by lookup
//! formulas, so an override shows in the view as soon as the overrides tab is republished.

use crate::api::{ensure_tab, replace_tab, Sheet};
use crate::model::order::RAW_ORDERS_HEADERS;
use crate::model::overrides::{MANUAL_OVERRIDES_HEADERS, MANUAL_OVERRIDES_TAB};
use crate::model::{column_letter, OrderRow};
use crate::Result;
use anyhow::Context;
use std::collections::HashSet;
use tracing::info;

pub const ORDERS_VIEW_TAB: &str = "ORDERS_VIEW";

/// Appended after the `RAW_ORDERS` columns.
const VIEW_HEADERS: [&str; 4] = ["PSL", "Shipping Label Cost", "Notes", "Profit"];

/// Column letters for the formulas, looked up by header name.
struct Columns {
    order_id: String,
    quantity: String,
    price: String,
    unit_cost: String,
    shipping: String,
    label_cost: String,
    key: String,
    override_psl: String,
    override_label_cost: String,
    override_notes: String,
}

impl Columns {
    fn new() -> Result<Self> {
        Ok(Self {
            order_id: letter(&RAW_ORDERS_HEADERS, "Order ID")?,
            quantity: letter(&RAW_ORDERS_HEADERS, "Quantity")?,
            price: letter(&RAW_ORDERS_HEADERS, "Price")?,
            unit_cost: letter(&RAW_ORDERS_HEADERS, "Unit Cost")?,
            shipping: letter(&RAW_ORDERS_HEADERS, "Shipping")?,
            label_cost: column_letter(RAW_ORDERS_HEADERS.len() + 1),
            key: letter(&MANUAL_OVERRIDES_HEADERS, "order_id")?,
            override_psl: letter(&MANUAL_OVERRIDES_HEADERS, "psl")?,
            override_label_cost: letter(&MANUAL_OVERRIDES_HEADERS, "shipping_label_cost")?,
            override_notes: letter(&MANUAL_OVERRIDES_HEADERS, "notes")?,
        })
    }

    /// `=IFERROR(XLOOKUP(A2,MANUAL_OVERRIDES!A:A,MANUAL_OVERRIDES!D:D,""),"")`
    fn lookup(&self, row: usize, value_col: &str, default: &str) -> String {
        format!(
            "=IFERROR(XLOOKUP({id}{row},{tab}!{key}:{key},{tab}!{value_col}:{value_col},{default}),{default})",
            id = self.order_id,
            tab = MANUAL_OVERRIDES_TAB,
            key = self.key,
        )
    }

    /// Price × quantity + shipping − unit cost × quantity − label cost.
    fn profit(&self, row: usize) -> String {
        format!(
            "={p}{row}*{q}{row}+{s}{row}-{c}{row}*{q}{row}-{l}{row}",
            p = self.price,
            q = self.quantity,
            s = self.shipping,
            c = self.unit_cost,
            l = self.label_cost,
        )
    }

    /// The label cost lookup only goes on the first line of an order so it is subtracted once.
    fn row_values(&self, row: &OrderRow, sheet_row: usize, first_line: bool) -> Vec<String> {
        let mut values = row.raw_values();
        values.push(self.lookup(sheet_row, &self.override_psl, "\"\""));
        values.push(if first_line {
            self.lookup(sheet_row, &self.override_label_cost, "0")
        } else {
            "0".to_string()
        });
        values.push(self.lookup(sheet_row, &self.override_notes, "\"\""));
        values.push(self.profit(sheet_row));
        values
    }
}

fn letter(headers: &[&str], name: &str) -> Result<String> {
    headers
        .iter()
        .position(|h| *h == name)
        .map(column_letter)
        .with_context(|| format!("No '{name}' column to look up"))
}

/// Rewrites `ORDERS_VIEW` for `rows`. Returns the number of data rows written.
pub(crate) async fn build_orders_view(
    sheet: &mut dyn Sheet,
    rows: &[OrderRow],
) -> Result<usize> {
    let columns = Columns::new()?;
    ensure_tab(sheet, ORDERS_VIEW_TAB, false).await?;
    let mut values: Vec<Vec<String>> = vec![RAW_ORDERS_HEADERS
        .iter()
        .chain(VIEW_HEADERS.iter())
        .map(|h| h.to_string())
        .collect()];
    let mut seen: HashSet<&str> = HashSet::new();
    for (i, row) in rows.iter().enumerate() {
        let first_line = seen.insert(row.order_id.as_str());
        values.push(columns.row_values(row, i + 2, first_line));
    }
    replace_tab(sheet, ORDERS_VIEW_TAB, values).await?;
    info!("Built {ORDERS_VIEW_TAB} with {} rows", rows.len());
    Ok(rows.len())
}
