//! Command handlers.
//!
//! Every handler takes a `Session` and returns an `Out`, so the same handler serves the CLI
//! subcommands and the keyword router behind the HTTP server.

mod auth;
mod format;
mod formulas;
mod init;
mod metrics;
mod overrides;
mod psl;
mod reports;
mod sync;
mod view;

use crate::api::{self, Mode, Sheet, Shop};
use crate::model::order::RAW_ORDERS_TAB;
use crate::model::{A1Range, OrderRow};
use crate::{Config, Result};
use anyhow::bail;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

pub use crate::db::FormulaChange;
pub use auth::{auth, auth_verify};
pub use format::{format_sheet, FormatReport};
pub use formulas::{
    fix_net_profit, fix_profit_per_shirt, revert_last_change, set_setup_costs, FormulaReport,
    NET_PROFIT_FORMULA,
};
pub use init::init;
pub use metrics::recompute_metrics;
pub use overrides::{
    add_note, get_notes, get_psl, set_label_cost, set_label_cost_for_unfulfilled, set_psl,
    show_missing_label_cost, show_negative_profit, show_unfulfilled, BulkLabelCost, OrderList,
    OrderSummary,
};
pub use psl::{
    backup_psl, migrate_psl, restore_psl, PslBackupReport, PslMigrateReport, PslRestoreReport,
};
pub use reports::{
    low_stock, orders_by_date_range, orders_summary, product_sales, profit_breakdown, revenue,
    revenue_trends, top_customers, top_products, CustomerSpend, DailyRevenue, DateRange,
    DateRangeReport, LowStockItem, OrdersSummary, ProductSale, ProfitBreakdown, RevenueReport,
    RevenueTrends, StockStatus,
};
pub use sync::{sync, SyncReport};
pub use view::ORDERS_VIEW_TAB;

/// The output type for a command. This allows the command to return a consistent message and,
/// optionally, structured data to both the command line and the HTTP interface.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// A message that can be printed to the user regarding the outcome of the command execution.
    message: String,

    /// Any structured data that needs to be output from the call.
    structure: Option<T>,
}

impl<T, S> From<S> for Out<T>
where
    T: Debug + Clone + Serialize,
    S: Into<String>,
{
    fn from(value: S) -> Self {
        Out::new_message(value)
    }
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// Create a new `Out` object that has `Some(structure)`.
    pub fn new<S>(message: S, structure: T) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: Some(structure),
        }
    }

    /// Create a new `Out` object that has `None` for `structure`.
    pub fn new_message<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn structure(&self) -> Option<&T> {
        self.structure.as_ref()
    }

    /// The structure as JSON, or `null`.
    pub fn structure_json(&self) -> serde_json::Value {
        self.structure
            .as_ref()
            .and_then(|s| serde_json::to_value(s).ok())
            .unwrap_or(serde_json::Value::Null)
    }

    /// Print the message to `info!` and the structured data (if it exists) as JSON to `debug!`.
    pub fn print(&self) {
        info!("{}", self.message);
        if let Some(structure) = self.structure() {
            if let Ok(json) = serde_json::to_string_pretty(structure) {
                debug!("Command output:\n\n{json}\n\n");
            }
        }
    }
}

/// What handlers work with: the configuration and lazily connected Google and Shopify clients.
/// A handler that only touches the sheet never needs Shopify credentials, and vice versa.
pub struct Session {
    config: Config,
    mode: Mode,
    actor: String,
    sheet: Option<Box<dyn Sheet>>,
    shop: Option<Box<dyn Shop>>,
}

impl Session {
    /// `actor` is recorded as `updated_by` on manual overrides.
    pub fn new(config: Config, mode: Mode, actor: impl Into<String>) -> Self {
        Self {
            config,
            mode,
            actor: actor.into(),
            sheet: None,
            shop: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub(crate) async fn sheet(&mut self) -> Result<&mut dyn Sheet> {
        let sheet = match self.sheet.take() {
            Some(sheet) => sheet,
            None => api::sheet(&self.config, self.mode).await?,
        };
        Ok(self.sheet.insert(sheet).as_mut())
    }

    pub(crate) async fn shop(&mut self) -> Result<&mut dyn Shop> {
        let shop = match self.shop.take() {
            Some(shop) => shop,
            None => api::shop(&self.config, self.mode).await?,
        };
        Ok(self.shop.insert(shop).as_mut())
    }
}

/// Every row of the hidden `RAW_ORDERS` tab. An empty list if the tab has not been written yet.
pub(crate) async fn read_raw_orders(sheet: &mut dyn Sheet) -> Result<Vec<OrderRow>> {
    if !sheet.tabs().await?.iter().any(|t| t.title == RAW_ORDERS_TAB) {
        return Ok(Vec::new());
    }
    let values = sheet.get(&A1Range::tab(RAW_ORDERS_TAB)).await?;
    Ok(values
        .iter()
        .skip(1)
        .filter_map(|row| OrderRow::from_raw_values(row))
        .collect())
}

/// Finds the order id and display number for `reference` (`1042`, `#1042` or an order id).
pub(crate) fn resolve_order(rows: &[OrderRow], reference: &str) -> Result<(String, String)> {
    match rows.iter().find(|r| r.matches(reference)) {
        Some(row) => Ok((row.order_id.clone(), row.order_number.clone())),
        None => bail!(
            "Order {} not found; run a sync first",
            reference.trim().trim_start_matches('#')
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out() {
        let out: Out<u32> = Out::new("done", 7);
        assert_eq!(out.message(), "done");
        assert_eq!(out.structure_json(), serde_json::json!(7));
        let out: Out<u32> = "only a message".into();
        assert!(out.structure().is_none());
        assert_eq!(out.structure_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_resolve_order() {
        let rows = vec![OrderRow {
            order_id: "5001".into(),
            order_number: "#1001".into(),
            ..Default::default()
        }];
        assert_eq!(
            resolve_order(&rows, "#1001").unwrap(),
            ("5001".to_string(), "#1001".to_string())
        );
        let err = resolve_order(&rows, "#1042").unwrap_err();
        assert_eq!(err.to_string(), "Order 1042 not found; run a sync first");
    }
}
