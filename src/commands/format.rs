//! Applies the theme to the `Orders` tab and the brand theme to the other tabs, all in one
//! `batchUpdate`.

use crate::api::{ensure_tab, Tab};
use crate::commands::view::ORDERS_VIEW_TAB;
use crate::commands::{Out, Session};
use crate::model::metrics::METRICS_TAB;
use crate::model::order::{ORDERS_HEADERS, ORDERS_TAB, RAW_ORDERS_TAB};
use crate::model::overrides::MANUAL_OVERRIDES_TAB;
use crate::model::A1Range;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

const COLUMN_WIDTHS: [u32; 13] = [150, 200, 80, 50, 80, 80, 80, 100, 80, 80, 100, 100, 110];

/// `E` through `I`.
const CURRENCY_COLUMNS: std::ops::Range<usize> = 4..9;
const PERCENT_COLUMN: usize = 9;
const SUMMARY_COLUMN: usize = 14;

/// Tabs that get the brand theme when they exist and are visible.
const BRAND_TABS: [&str; 7] = [
    "HOME", ORDERS_VIEW_TAB, "FINANCE", METRICS_TAB, "PRODUCTS", "COSTS", "SETTINGS",
];

const HIDDEN_TABS: [&str; 2] = [RAW_ORDERS_TAB, MANUAL_OVERRIDES_TAB];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatReport {
    pub requests: usize,
    pub branded: Vec<String>,
    pub hidden: Vec<String>,
}

fn rgb(red: f64, green: f64, blue: f64) -> Value {
    json!({"red": red, "green": green, "blue": blue})
}

fn grid(sheet_id: i64, rows: (usize, usize), cols: (usize, usize)) -> Value {
    json!({
        "sheetId": sheet_id,
        "startRowIndex": rows.0,
        "endRowIndex": rows.1,
        "startColumnIndex": cols.0,
        "endColumnIndex": cols.1,
    })
}

fn repeat_cell(range: Value, format: Value, fields: &str) -> Value {
    json!({
        "repeatCell": {
            "range": range,
            "cell": {"userEnteredFormat": format},
            "fields": fields,
        }
    })
}

fn borders(range: Value, color: Value) -> Value {
    let border = json!({"style": "SOLID", "width": 1, "color": color});
    json!({
        "updateBorders": {
            "range": range,
            "top": border,
            "bottom": border,
            "left": border,
            "right": border,
            "innerHorizontal": border,
            "innerVertical": border,
        }
    })
}

fn background(range: Value, color: Value) -> Value {
    repeat_cell(
        range,
        json!({"backgroundColor": color}),
        "userEnteredFormat.backgroundColor",
    )
}

/// The `Orders` tab: header, borders, number formats, widths, frozen header, filter and the
/// summary block.
fn orders_requests(sheet_id: i64, last_row: usize) -> Vec<Value> {
    let cols = ORDERS_HEADERS.len();
    let mut requests = vec![
        repeat_cell(
            grid(sheet_id, (0, 1), (0, cols)),
            json!({
                "backgroundColor": rgb(0.88, 0.88, 0.88),
                "textFormat": {"bold": true, "fontSize": 11},
                "horizontalAlignment": "CENTER",
            }),
            "userEnteredFormat(backgroundColor,textFormat,horizontalAlignment)",
        ),
        borders(grid(sheet_id, (0, 1), (0, cols)), rgb(0.0, 0.0, 0.0)),
        borders(grid(sheet_id, (1, last_row), (0, cols)), rgb(0.8, 0.8, 0.8)),
        repeat_cell(
            grid(sheet_id, (1, last_row), (CURRENCY_COLUMNS.start, CURRENCY_COLUMNS.end)),
            json!({"numberFormat": {"type": "CURRENCY", "pattern": "$#,##0.00"}}),
            "userEnteredFormat.numberFormat",
        ),
        repeat_cell(
            grid(sheet_id, (1, last_row), (PERCENT_COLUMN, PERCENT_COLUMN + 1)),
            json!({"numberFormat": {"type": "PERCENT", "pattern": "0.0%"}}),
            "userEnteredFormat.numberFormat",
        ),
    ];

    for (i, width) in COLUMN_WIDTHS.iter().enumerate() {
        requests.push(json!({
            "updateDimensionProperties": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "COLUMNS",
                    "startIndex": i,
                    "endIndex": i + 1,
                },
                "properties": {"pixelSize": width},
                "fields": "pixelSize",
            }
        }));
    }

    requests.push(json!({
        "updateSheetProperties": {
            "properties": {"sheetId": sheet_id, "gridProperties": {"frozenRowCount": 1}},
            "fields": "gridProperties.frozenRowCount",
        }
    }));
    requests.push(json!({
        "setBasicFilter": {"filter": {"range": grid(sheet_id, (0, last_row), (0, cols))}}
    }));

    let summary = (SUMMARY_COLUMN, SUMMARY_COLUMN + 2);
    requests.push(repeat_cell(
        grid(sheet_id, (0, 1), summary),
        json!({
            "backgroundColor": rgb(1.0, 0.65, 0.0),
            "textFormat": {"foregroundColor": rgb(0.0, 0.0, 0.0), "fontSize": 11, "bold": true},
            "horizontalAlignment": "CENTER",
        }),
        "userEnteredFormat(backgroundColor,textFormat,horizontalAlignment)",
    ));
    // TOTAL COSTS, NET PROFIT, Profit Per Shirt, Shopify Payout
    for row in [3, 4, 5, 7] {
        requests.push(repeat_cell(
            grid(sheet_id, (row, row + 1), summary),
            json!({"textFormat": {"bold": true}}),
            "userEnteredFormat.textFormat.bold",
        ));
    }
    requests.push(background(grid(sheet_id, (3, 4), summary), rgb(0.8, 0.2, 0.2)));
    requests.push(background(grid(sheet_id, (4, 5), summary), rgb(0.5, 1.0, 0.5)));
    requests.push(background(grid(sheet_id, (5, 6), summary), rgb(0.85, 0.95, 0.85)));
    requests
}

fn brand_requests(sheet_id: i64) -> Vec<Value> {
    vec![
        repeat_cell(
            json!({"sheetId": sheet_id, "startRowIndex": 0, "endRowIndex": 1}),
            json!({
                "backgroundColor": rgb(0.2, 0.2, 0.25),
                "textFormat": {"foregroundColor": rgb(0.95, 0.95, 0.95), "bold": true},
                "horizontalAlignment": "CENTER",
            }),
            "userEnteredFormat(backgroundColor,textFormat,horizontalAlignment)",
        ),
        json!({
            "updateSheetProperties": {
                "properties": {
                    "sheetId": sheet_id,
                    "gridProperties": {"hideGridlines": true, "frozenRowCount": 1},
                },
                "fields": "gridProperties.hideGridlines,gridProperties.frozenRowCount",
            }
        }),
    ]
}

fn hide_request(tab: &Tab) -> Value {
    json!({
        "updateSheetProperties": {
            "properties": {"sheetId": tab.sheet_id, "hidden": true},
            "fields": "hidden",
        }
    })
}

/// Formats every tab the spreadsheet has. Tabs that are missing are skipped, except `Orders`,
/// which is created.
pub async fn format_sheet(session: &mut Session) -> Result<Out<FormatReport>> {
    let sheet = session.sheet().await?;
    let orders = ensure_tab(sheet, ORDERS_TAB, false).await?;
    let used_rows = sheet
        .get(&A1Range::columns(ORDERS_TAB, "A", "A", 1, 10_000)?)
        .await?
        .len();
    let last_row = used_rows.max(2);
    let tabs = sheet.tabs().await?;

    let mut report = FormatReport::default();
    let mut requests = orders_requests(orders.sheet_id, last_row);
    for tab in tabs.iter().filter(|t| !t.hidden) {
        if BRAND_TABS.contains(&tab.title.as_str()) {
            requests.extend(brand_requests(tab.sheet_id));
            report.branded.push(tab.title.clone());
        }
    }
    for tab in tabs.iter().filter(|t| HIDDEN_TABS.contains(&t.title.as_str())) {
        requests.push(hide_request(tab));
        report.hidden.push(tab.title.clone());
    }
    report.requests = requests.len();
    debug!("Formatting with {} requests", report.requests);
    sheet.batch_update(requests).await?;

    info!(
        "Formatted {ORDERS_TAB}, {} branded tabs and {} hidden tabs",
        report.branded.len(),
        report.hidden.len()
    );
    let mut message = format!("Formatted the {ORDERS_TAB} tab ({} rows)", last_row);
    if !report.branded.is_empty() {
        message.push_str(&format!(". Styled: {}", report.branded.join(", ")));
    }
    if !report.hidden.is_empty() {
        message.push_str(&format!(". Hidden: {}", report.hidden.join(", ")));
    }
    Ok(Out::new(message, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TestSheet;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_format_sends_one_batch() {
        let env = TestEnv::new().await;
        let id = env.spreadsheet_id();
        TestSheet::set_tab(id, METRICS_TAB, vec![vec!["key".into()]]);
        TestSheet::set_tab(id, RAW_ORDERS_TAB, vec![vec!["Order ID".into()]]);
        TestSheet::clear_log(id);

        let mut session = env.session();
        let out = format_sheet(&mut session).await.unwrap();
        let report = out.structure().unwrap();
        assert_eq!(report.branded, vec![METRICS_TAB]);
        assert_eq!(report.hidden, vec![RAW_ORDERS_TAB]);

        let state = TestSheet::state(id);
        assert_eq!(state.batches, 1);
        assert_eq!(state.requests.len(), report.requests);
        assert!(state
            .tabs
            .iter()
            .any(|t| t.title == RAW_ORDERS_TAB && t.hidden));

        let filter = state
            .requests
            .iter()
            .find_map(|r| r.pointer("/setBasicFilter/filter/range"))
            .unwrap();
        assert_eq!(filter["endRowIndex"], 4);
        assert_eq!(filter["endColumnIndex"], 13);

        let widths: Vec<u64> = state
            .requests
            .iter()
            .filter_map(|r| r.pointer("/updateDimensionProperties/properties/pixelSize"))
            .filter_map(Value::as_u64)
            .collect();
        assert_eq!(widths, COLUMN_WIDTHS.iter().map(|w| *w as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_orders_requests_formats() {
        let requests = orders_requests(7, 10);
        let patterns: Vec<&str> = requests
            .iter()
            .filter_map(|r| r.pointer("/repeatCell/cell/userEnteredFormat/numberFormat/pattern"))
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(patterns, vec!["$#,##0.00", "0.0%"]);
        let dark_red = requests
            .iter()
            .find(|r| {
                r.pointer("/repeatCell/range/startRowIndex") == Some(&json!(3))
                    && r.pointer("/repeatCell/cell/userEnteredFormat/backgroundColor")
                        .is_some()
            })
            .unwrap();
        assert_eq!(dark_red["repeatCell"]["range"]["startColumnIndex"], 14);
    }
}
