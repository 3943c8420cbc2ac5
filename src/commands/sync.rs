//! The full Shopify → `Orders` tab sync.

use crate::api::{ensure_tab, replace_tab, Sheet, SheetRange};
use crate::commands::metrics::{current_setup_costs, write_metrics};
use crate::commands::overrides::publish_overrides;
use crate::commands::psl::{backup_psl, write_psl};
use crate::commands::view::build_orders_view;
use crate::commands::{Out, Session};
use crate::db::SyncRun;
use crate::model::order::{
    order_rows, ORDERS_HEADERS, ORDERS_TAB, RAW_ORDERS_HEADERS, RAW_ORDERS_TAB,
};
use crate::model::psl::PSL_COLUMN;
use crate::model::{column_index, A1Range, Amount, ManualOverride, OrderRow, PslValues, RowCol};
use crate::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Columns A through M.
const ORDERS_COLUMNS: usize = ORDERS_HEADERS.len();
/// Column O, where the summary block starts.
const SUMMARY_COLUMN: usize = 14;
/// Shopify Payments: 2.9% plus $0.30 per transaction.
const PAYOUT_FEE_RATE: Decimal = Decimal::from_parts(29, 0, 0, false, 3);
const PAYOUT_FEE_FIXED: Decimal = Decimal::from_parts(30, 0, 0, false, 2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub orders_before: i64,
    pub orders_after: i64,
    pub new_orders: i64,
    pub rows_written: i64,
    pub psl_backed_up: i64,
    pub psl_restored: i64,
}

/// Backs up the PSL column, replaces the order data with fresh rows from Shopify, restores the
/// PSL column, then rewrites `RAW_ORDERS`, the overrides view, the summary block and the metrics.
/// Any error aborts.
pub async fn sync(session: &mut Session) -> Result<Out<SyncReport>> {
    let started_at = Utc::now();
    let config = session.config().clone();
    let db = config.db().clone();
    info!("Starting sync from {}", config.store_url());
    if let Some(previous) = db.last_sync_run().await? {
        debug!(
            "Previous sync finished at {} with {} order rows",
            previous.finished_at, previous.orders_after
        );
    }

    let sheet = session.sheet().await?;
    ensure_tab(sheet, ORDERS_TAB, false).await?;
    let existing = sheet.get(&A1Range::tab(ORDERS_TAB)).await?;
    let old_last_row = last_data_row(&existing);
    let has_psl_header = header_cell(&existing, column_index(PSL_COLUMN)?).is_some();
    let orders_before = old_last_row.saturating_sub(1);
    debug!("{orders_before} data rows before sync");

    let backup = backup_psl(session).await?;
    let psl_backup = backup
        .structure()
        .map(|b| b.values.clone())
        .unwrap_or_default();

    let orders = session.shop().await?.orders().await?;
    let rows = order_rows(&orders, Amount::new(config.cost_per_shirt()));
    info!(
        "Fetched {} orders ({} line items) from Shopify",
        orders.len(),
        rows.len()
    );

    let sheet = session.sheet().await?;
    write_orders(sheet, &rows, old_last_row, has_psl_header).await?;

    let overrides = db.overrides().await?;
    let to_restore = psl_to_restore(&psl_backup, &rows, &overrides);
    let psl_restored = write_psl(sheet, &to_restore).await?;
    debug!("Restored {psl_restored} PSL values");

    write_raw_orders(sheet, &rows).await?;
    publish_overrides(sheet, &db).await?;
    build_orders_view(sheet, &rows).await?;
    let setup_costs = current_setup_costs(sheet, config.setup_costs()).await?;
    write_summary(sheet, &rows, setup_costs).await?;
    write_metrics(sheet, &rows, &overrides, setup_costs).await?;

    let report = SyncReport {
        orders_before: orders_before as i64,
        orders_after: rows.len() as i64,
        new_orders: rows.len() as i64 - orders_before as i64,
        rows_written: rows.len() as i64,
        psl_backed_up: psl_backup.len() as i64,
        psl_restored: psl_restored as i64,
    };
    db.record_sync_run(&SyncRun {
        started_at,
        finished_at: Utc::now(),
        orders_before: report.orders_before,
        orders_after: report.orders_after,
        rows_written: report.rows_written,
        psl_backed_up: report.psl_backed_up,
        psl_restored: report.psl_restored,
    })
    .await?;

    let mut message = format!(
        "Sync complete. {} order rows in the sheet",
        report.orders_after
    );
    if report.new_orders > 0 {
        message.push_str(&format!(" ({} new)", report.new_orders));
    }
    message.push_str(&format!(
        ". PSL values: {} backed up, {} restored",
        report.psl_backed_up, report.psl_restored
    ));
    Ok(Out::new(message, report))
}

/// The 1-based row of the last row with anything in `A:M`, or 0 for an empty tab.
fn last_data_row(values: &[Vec<String>]) -> usize {
    values
        .iter()
        .rposition(|row| row.iter().take(ORDERS_COLUMNS).any(|c| !c.trim().is_empty()))
        .map(|i| i + 1)
        .unwrap_or(0)
}

fn header_cell(values: &[Vec<String>], col: usize) -> Option<&str> {
    values
        .first()
        .and_then(|row| row.get(col))
        .map(String::as_str)
        .filter(|c| !c.trim().is_empty())
}

/// One write for the header and data in `A:F` and `H:M`, then clears whatever old rows remain
/// below the new data. Column G is only written when its header is missing.
async fn write_orders(
    sheet: &mut dyn Sheet,
    rows: &[OrderRow],
    old_last_row: usize,
    has_psl_header: bool,
) -> Result<()> {
    let psl_col = column_index(PSL_COLUMN)?;
    let header: Vec<String> = ORDERS_HEADERS.iter().map(|h| h.to_string()).collect();
    let mut left = vec![header[..psl_col].to_vec()];
    let mut right = vec![header[psl_col + 1..].to_vec()];
    for (i, row) in rows.iter().enumerate() {
        left.push(row.orders_left());
        right.push(row.orders_right(i + 2));
    }

    let mut data = vec![
        SheetRange::new(A1Range::cell(ORDERS_TAB, RowCol::new(0, 0)), left),
        SheetRange::new(A1Range::cell(ORDERS_TAB, RowCol::new(0, psl_col + 1)), right),
    ];
    if !has_psl_header {
        data.push(SheetRange::new(
            A1Range::cell(ORDERS_TAB, RowCol::new(0, psl_col)),
            vec![vec![header[psl_col].clone()]],
        ));
    }
    sheet.write_ranges(&data).await?;

    let new_last_row = rows.len() + 1;
    if old_last_row > new_last_row {
        let first = RowCol::new(new_last_row, 0);
        sheet
            .clear_ranges(&[
                A1Range::span(ORDERS_TAB, first, RowCol::new(old_last_row - 1, psl_col - 1)),
                A1Range::span(
                    ORDERS_TAB,
                    RowCol::new(new_last_row, psl_col + 1),
                    RowCol::new(old_last_row - 1, ORDERS_COLUMNS - 1),
                ),
            ])
            .await?;
        debug!("Cleared stale rows {} to {old_last_row}", new_last_row + 1);
    }
    info!("Wrote {} order rows", rows.len());
    Ok(())
}

/// The backed up values, plus override PSLs for rows the backup has nothing for.
fn psl_to_restore(
    backup: &PslValues,
    rows: &[OrderRow],
    overrides: &[ManualOverride],
) -> PslValues {
    let by_order: HashMap<&str, &str> = overrides
        .iter()
        .filter_map(|o| Some((o.order_id.as_str(), o.psl.as_deref()?)))
        .filter(|(_, psl)| !psl.trim().is_empty())
        .collect();
    let mut values = backup.clone();
    for (i, row) in rows.iter().enumerate() {
        let sheet_row = i + 2;
        if values.get(sheet_row).is_some() {
            continue;
        }
        if let Some(psl) = by_order.get(row.order_id.as_str()) {
            values.insert(sheet_row, *psl);
        }
    }
    values
}

async fn write_raw_orders(sheet: &mut dyn Sheet, rows: &[OrderRow]) -> Result<()> {
    ensure_tab(sheet, RAW_ORDERS_TAB, true).await?;
    let mut values: Vec<Vec<String>> =
        vec![RAW_ORDERS_HEADERS.iter().map(|h| h.to_string()).collect()];
    values.extend(rows.iter().map(OrderRow::raw_values));
    replace_tab(sheet, RAW_ORDERS_TAB, values).await
}

/// Rows counted toward the payout: not partially refunded, shipped or pending, with a price.
fn is_paid_out(row: &OrderRow) -> bool {
    let shipping = row.shipping_status();
    row.order_status() != "Partially Refunded"
        && shipping != "Unfulfilled"
        && shipping != "Partial"
        && row.price.value() > Decimal::ZERO
}

/// Sum of included sold prices less 2.9% and $0.30 per included row.
pub(crate) fn shopify_payout(rows: &[OrderRow]) -> Amount {
    let included: Vec<&OrderRow> = rows.iter().filter(|r| is_paid_out(r)).collect();
    let gross: Decimal = included.iter().map(|r| r.price.value()).sum();
    let fees = gross * PAYOUT_FEE_RATE + PAYOUT_FEE_FIXED * Decimal::from(included.len());
    Amount::new(gross - fees).round()
}

/// `Orders!O1:P8`.
pub(crate) fn summary_values(rows: &[OrderRow], setup_costs: Decimal) -> Vec<Vec<String>> {
    let last = (rows.len() + 1).max(2);
    let pair = |label: &str, value: String| vec![label.to_string(), value];
    vec![
        pair("Metric", "Value".to_string()),
        pair(
            "Total Revenue",
            format!(
                "=SUMIFS(E2:E{last}, L2:L{last}, \"<>Partially Refunded\", M2:M{last}, \
                \"<>Unfulfilled\", M2:M{last}, \"<>Partial\")"
            ),
        ),
        pair("Total Product Costs", format!("=SUM(H2:H{last})")),
        pair("TOTAL COSTS", setup_costs.to_string()),
        pair("NET PROFIT", "=P2-P4".to_string()),
        pair("Profit Per Shirt (Overall)", format!("=SUM(I2:I{last})")),
        pair("Total Units Sold", format!("=SUM(D2:D{last})")),
        pair("Shopify Payout", shopify_payout(rows).value().to_string()),
    ]
}

async fn write_summary(
    sheet: &mut dyn Sheet,
    rows: &[OrderRow],
    setup_costs: Decimal,
) -> Result<()> {
    sheet
        .write_ranges(&[SheetRange::new(
            A1Range::cell(ORDERS_TAB, RowCol::new(0, SUMMARY_COLUMN)),
            summary_values(rows, setup_costs),
        )])
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{TestShop, TestSheet};
    use crate::model::metrics::METRICS_TAB;
    use crate::model::{OverrideUpdate, ShopOrder};
    use crate::test::TestEnv;

    fn cell(values: &[Vec<String>], a1: &str) -> String {
        let rc: RowCol = a1.parse().unwrap();
        values
            .get(rc.row())
            .and_then(|r| r.get(rc.col()))
            .cloned()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_sync_writes_rows_and_keeps_psl() {
        let env = TestEnv::new().await;
        let mut session = env.session();
        let out = sync(&mut session).await.unwrap();
        let report = out.structure().unwrap();
        assert_eq!(report.orders_before, 3);
        assert_eq!(report.orders_after, 5);
        assert_eq!(report.new_orders, 2);
        assert_eq!(report.psl_backed_up, 2);
        assert_eq!(report.psl_restored, 2);

        let orders = TestSheet::cells(env.spreadsheet_id(), ORDERS_TAB);
        assert_eq!(cell(&orders, "A2"), "Pat Lee");
        assert_eq!(cell(&orders, "C2"), "L");
        assert_eq!(cell(&orders, "F2"), "5.00");
        assert_eq!(cell(&orders, "G2"), "4.85");
        assert_eq!(cell(&orders, "G3"), "");
        assert_eq!(cell(&orders, "G4"), "XYZ");
        assert_eq!(cell(&orders, "I6"), "=(E6-H6-G6)+F6");
        assert_eq!(cell(&orders, "M5"), "Pending");
        assert_eq!(cell(&orders, "A5"), "jo@example.com");
        assert_eq!(cell(&orders, "L5"), "Partially Refunded");
        assert_eq!(cell(&orders, "O4"), "TOTAL COSTS");
        assert_eq!(cell(&orders, "P4"), "809.32");
        assert_eq!(cell(&orders, "P5"), "=P2-P4");
        assert_eq!(cell(&orders, "P8"), "23.98");

        let raw = TestSheet::cells(env.spreadsheet_id(), RAW_ORDERS_TAB);
        assert_eq!(raw.len(), 6);
        assert_eq!(raw[1][0], "5001");
        let metrics = TestSheet::cells(env.spreadsheet_id(), METRICS_TAB);
        assert_eq!(metrics[0], vec!["key", "label", "value"]);

        let run = env.config().db().last_sync_run().await.unwrap().unwrap();
        assert_eq!(run.orders_after, 5);
    }

    #[tokio::test]
    async fn test_sync_only_restore_writes_column_g() {
        let env = TestEnv::new().await;
        TestSheet::clear_log(env.spreadsheet_id());
        let mut session = env.session();
        sync(&mut session).await.unwrap();

        let g = column_index(PSL_COLUMN).unwrap();
        let touching_g: Vec<String> = TestSheet::state(env.spreadsheet_id())
            .writes
            .into_iter()
            .filter(|w| {
                let range: A1Range = w.parse().unwrap();
                range.sheet() == ORDERS_TAB
                    && range.start().unwrap().col() <= g
                    && range.end().unwrap().col() >= g
            })
            .collect();
        assert_eq!(touching_g, vec!["Orders!G2", "Orders!G4"]);
    }

    #[tokio::test]
    async fn test_sync_clears_stale_rows() {
        let env = TestEnv::new().await;
        let mut session = env.session();
        sync(&mut session).await.unwrap();

        let one: ShopOrder = serde_json::from_str(
            r##"{"id": 7001, "name": "#2001", "created_at": "2024-04-01T00:00:00Z",
                 "financial_status": "paid", "fulfillment_status": "fulfilled",
                 "line_items": [{"title": "Logo Tee", "variant_title": "M", "quantity": 1, "price": "25.00"}]}"##,
        )
        .unwrap();
        TestShop::set_orders(env.store_url(), vec![one]);
        let out = sync(&mut session).await.unwrap();
        assert_eq!(out.structure().unwrap().orders_before, 5);
        assert_eq!(out.structure().unwrap().new_orders, -4);

        let orders = TestSheet::cells(env.spreadsheet_id(), ORDERS_TAB);
        assert_eq!(cell(&orders, "A2"), "Unknown");
        assert_eq!(cell(&orders, "A3"), "");
        assert_eq!(cell(&orders, "M6"), "");
        assert_eq!(cell(&orders, "G4"), "XYZ");
        assert!(cell(&orders, "P2").contains("E2:E2"));
    }

    #[tokio::test]
    async fn test_sync_restores_override_psl() {
        let env = TestEnv::new().await;
        env.config()
            .db()
            .upsert_override("5004", OverrideUpdate::new("test").psl("3.33"))
            .await
            .unwrap();
        let mut session = env.session();
        let out = sync(&mut session).await.unwrap();
        assert_eq!(out.structure().unwrap().psl_restored, 3);
        let orders = TestSheet::cells(env.spreadsheet_id(), ORDERS_TAB);
        assert_eq!(cell(&orders, "G6"), "3.33");
    }

    #[tokio::test]
    async fn test_sync_shop_failure_aborts() {
        let env = TestEnv::new().await;
        TestShop::fail_with(env.store_url(), "Shopify returned 401");
        let mut session = env.session();
        let err = sync(&mut session).await.unwrap_err();
        assert!(err.to_string().contains("401"));
        let raw = TestSheet::cells(env.spreadsheet_id(), RAW_ORDERS_TAB);
        assert!(raw.is_empty());
        assert!(env.config().db().last_sync_run().await.unwrap().is_none());
    }

    #[test]
    fn test_summary_last_row_minimum() {
        let values = summary_values(&[], Decimal::new(80932, 2));
        assert_eq!(values.len(), 8);
        assert_eq!(values[2][1], "=SUM(H2:H2)");
        assert_eq!(Amount::from_cell(&values[7][1]), Amount::ZERO);
    }

    #[test]
    fn test_last_data_row() {
        let values = vec![
            vec!["h".to_string()],
            vec!["a".to_string()],
            vec![String::new(); 14].into_iter().chain(["x".to_string()]).collect(),
        ];
        assert_eq!(last_data_row(&values), 2);
        assert_eq!(last_data_row(&[]), 0);
    }
}
