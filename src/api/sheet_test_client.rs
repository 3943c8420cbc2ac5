//! Implements the `Sheet` trait using in-memory data for testing purposes.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the whole
//! app, top-to-bottom, without using Google Sheets. State is global and keyed by spreadsheet id, so
//! every `TestSheet` created for the same id sees the same tabs, the way every `GoogleSheet` sees
//! the same spreadsheet.

use crate::api::{Sheet, SheetRange, Tab};
use crate::model::{A1Range, RowCol};
use crate::Result;
use anyhow::{bail, Context};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard, OnceLock};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TestTab {
    pub(crate) sheet_id: i64,
    pub(crate) title: String,
    pub(crate) hidden: bool,
    pub(crate) cells: Vec<Vec<String>>,
}

/// Everything a `TestSheet` remembers about one spreadsheet.
#[derive(Debug, Clone, Default)]
pub(crate) struct TestSheetState {
    pub(crate) tabs: Vec<TestTab>,
    /// Every `batchUpdate` request received, in order.
    pub(crate) requests: Vec<Value>,
    /// How many `batchUpdate` calls were made.
    pub(crate) batches: usize,
    /// The A1 range covered by every value write, in order.
    pub(crate) writes: Vec<String>,
}

impl TestSheetState {
    fn tab(&self, title: &str) -> Result<&TestTab> {
        self.tabs
            .iter()
            .find(|t| t.title == title)
            .with_context(|| format!("Unable to parse range: tab '{title}' not found"))
    }

    fn tab_mut(&mut self, title: &str) -> Result<&mut TestTab> {
        self.tabs
            .iter_mut()
            .find(|t| t.title == title)
            .with_context(|| format!("Unable to parse range: tab '{title}' not found"))
    }
}

fn global() -> MutexGuard<'static, HashMap<String, TestSheetState>> {
    static STATE: OnceLock<Mutex<HashMap<String, TestSheetState>>> = OnceLock::new();
    STATE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

/// An implementation of the `Sheet` trait that does not use Google sheets. A spreadsheet id seen
/// for the first time is seeded with an `Orders` tab holding the result of an earlier sync.
pub(crate) struct TestSheet {
    spreadsheet_id: String,
}

impl TestSheet {
    pub(crate) fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TestSheetState) -> Result<T>) -> Result<T> {
        let mut map = global();
        if !map.contains_key(&self.spreadsheet_id) {
            map.insert(self.spreadsheet_id.clone(), seed()?);
        }
        let state = map
            .get_mut(&self.spreadsheet_id)
            .context("Test sheet state is missing")?;
        f(state)
    }

    /// A copy of the current state.
    #[cfg(test)]
    pub(crate) fn state(spreadsheet_id: &str) -> TestSheetState {
        let sheet = TestSheet::new(spreadsheet_id);
        sheet.with_state(|s| Ok(s.clone())).unwrap()
    }

    /// The raw cells of one tab, or empty if it does not exist.
    #[cfg(test)]
    pub(crate) fn cells(spreadsheet_id: &str, title: &str) -> Vec<Vec<String>> {
        Self::state(spreadsheet_id)
            .tabs
            .into_iter()
            .find(|t| t.title == title)
            .map(|t| t.cells)
            .unwrap_or_default()
    }

    /// Replaces (or adds) a tab.
    #[cfg(test)]
    pub(crate) fn set_tab(spreadsheet_id: &str, title: &str, cells: Vec<Vec<String>>) {
        let sheet = TestSheet::new(spreadsheet_id);
        sheet
            .with_state(|s| {
                match s.tabs.iter_mut().find(|t| t.title == title) {
                    Some(tab) => tab.cells = cells,
                    None => {
                        let sheet_id = next_sheet_id(s);
                        s.tabs.push(TestTab {
                            sheet_id,
                            title: title.to_string(),
                            hidden: false,
                            cells,
                        });
                    }
                }
                Ok(())
            })
            .unwrap()
    }

    /// Forgets the recorded writes and requests.
    #[cfg(test)]
    pub(crate) fn clear_log(spreadsheet_id: &str) {
        let sheet = TestSheet::new(spreadsheet_id);
        sheet
            .with_state(|s| {
                s.writes.clear();
                s.requests.clear();
                s.batches = 0;
                Ok(())
            })
            .unwrap()
    }
}

#[async_trait::async_trait]
impl Sheet for TestSheet {
    async fn get(&mut self, range: &A1Range) -> Result<Vec<Vec<String>>> {
        self.with_state(|s| Ok(read(s.tab(range.sheet())?, range)))
    }

    async fn get_formulas(&mut self, range: &A1Range) -> Result<Vec<Vec<String>>> {
        self.get(range).await
    }

    async fn clear_ranges(&mut self, ranges: &[A1Range]) -> Result<()> {
        self.with_state(|s| {
            for range in ranges {
                let tab = s.tab_mut(range.sheet())?;
                match (range.start(), range.end()) {
                    (Some(start), Some(end)) => {
                        let rows = end.row() + 1 - start.row();
                        for row in tab.cells.iter_mut().skip(start.row()).take(rows) {
                            for col in start.col()..=end.col() {
                                if let Some(cell) = row.get_mut(col) {
                                    cell.clear();
                                }
                            }
                        }
                    }
                    _ => tab.cells.clear(),
                }
            }
            Ok(())
        })
    }

    async fn write_ranges(&mut self, data: &[SheetRange]) -> Result<()> {
        self.with_state(|s| {
            for sr in data {
                let anchor = sr.range.start().unwrap_or(RowCol(0, 0));
                let tab = s.tab_mut(sr.range.sheet())?;
                let mut width = 0;
                for (r, row) in sr.values.iter().enumerate() {
                    width = width.max(row.len());
                    for (c, value) in row.iter().enumerate() {
                        set_cell(&mut tab.cells, anchor.row() + r, anchor.col() + c, value);
                    }
                }
                if !sr.values.is_empty() && width > 0 {
                    let end = RowCol(anchor.row() + sr.values.len() - 1, anchor.col() + width - 1);
                    let written = A1Range::span(sr.range.sheet(), anchor, end);
                    s.writes.push(written.to_string());
                }
            }
            Ok(())
        })
    }

    async fn tabs(&mut self) -> Result<Vec<Tab>> {
        self.with_state(|s| {
            Ok(s.tabs
                .iter()
                .map(|t| Tab {
                    sheet_id: t.sheet_id,
                    title: t.title.clone(),
                    hidden: t.hidden,
                })
                .collect())
        })
    }

    async fn batch_update(&mut self, requests: Vec<Value>) -> Result<()> {
        self.with_state(|s| {
            s.batches += 1;
            for request in requests {
                if let Some(props) = request.pointer("/addSheet/properties") {
                    let title = props
                        .get("title")
                        .and_then(Value::as_str)
                        .context("addSheet without a title")?;
                    if s.tabs.iter().any(|t| t.title == title) {
                        bail!("A sheet with the name \"{title}\" already exists");
                    }
                    let sheet_id = next_sheet_id(s);
                    s.tabs.push(TestTab {
                        sheet_id,
                        title: title.to_string(),
                        hidden: props.get("hidden").and_then(Value::as_bool).unwrap_or(false),
                        cells: Vec::new(),
                    });
                }
                if let Some(props) = request.pointer("/updateSheetProperties/properties") {
                    let sheet_id = props.get("sheetId").and_then(Value::as_i64).unwrap_or(0);
                    if let Some(hidden) = props.get("hidden").and_then(Value::as_bool) {
                        if let Some(tab) = s.tabs.iter_mut().find(|t| t.sheet_id == sheet_id) {
                            tab.hidden = hidden;
                        }
                    }
                }
                s.requests.push(request);
            }
            Ok(())
        })
    }
}

fn next_sheet_id(state: &TestSheetState) -> i64 {
    state.tabs.iter().map(|t| t.sheet_id).max().unwrap_or(-1) + 1
}

fn set_cell(cells: &mut Vec<Vec<String>>, row: usize, col: usize, value: &str) {
    if cells.len() <= row {
        cells.resize(row + 1, Vec::new());
    }
    let r = &mut cells[row];
    if r.len() <= col {
        r.resize(col + 1, String::new());
    }
    r[col] = value.to_string();
}

/// Slices `range` out of the tab and trims trailing empty cells and rows, as the API does.
fn read(tab: &TestTab, range: &A1Range) -> Vec<Vec<String>> {
    let (start, end) = match (range.start(), range.end()) {
        (Some(start), Some(end)) => (start, end),
        _ => (RowCol(0, 0), RowCol(usize::MAX - 1, usize::MAX - 1)),
    };
    let mut rows: Vec<Vec<String>> = tab
        .cells
        .iter()
        .skip(start.row())
        .take(end.row().saturating_sub(start.row()).saturating_add(1))
        .map(|row| {
            let mut cells: Vec<String> = row
                .iter()
                .skip(start.col())
                .take(end.col().saturating_sub(start.col()).saturating_add(1))
                .cloned()
                .collect();
            while cells.last().is_some_and(|c| c.is_empty()) {
                cells.pop();
            }
            cells
        })
        .collect();
    while rows.last().is_some_and(|r| r.is_empty()) {
        rows.pop();
    }
    rows
}

fn seed() -> Result<TestSheetState> {
    Ok(TestSheetState {
        tabs: vec![TestTab {
            sheet_id: 0,
            title: crate::model::order::ORDERS_TAB.to_string(),
            hidden: false,
            cells: load_csv(ORDERS_DATA)?,
        }],
        requests: Vec::new(),
        batches: 0,
        writes: Vec::new(),
    })
}

fn load_csv(csv_data: &str) -> Result<Vec<Vec<String>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(Cursor::new(csv_data.as_bytes()));
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.context("Invalid seed CSV")?;
        rows.push(record.iter().map(|field| field.to_string()).collect());
    }
    Ok(rows)
}

/// The `Orders` tab as an earlier sync left it, with PSL values typed into G2 and G4.
const ORDERS_DATA: &str = r##"Customer Name,Product Name,Size,Quantity,Sold Price,Shipping Cost,PSL,Unit Cost,Profit,Profit Margin %,Date,Order Status,Shipping Status
Pat Lee,Logo Tee,L,2,25.00,5.00,4.85,12.26,=(E2-H2-G2)+F2,"=IF(E2<>0, I2/E2, 0)",2024-03-01,Paid,Shipped
Sam Diaz,Logo Tee,M,1,25.00,7.50,,12.26,=(E3-H3-G3)+F3,"=IF(E3<>0, I3/E3, 0)",2024-03-02,Paid,Unfulfilled
Sam Diaz,Hoodie,XL,1,45.00,0,XYZ,12.26,=(E4-H4-G4)+F4,"=IF(E4<>0, I4/E4, 0)",2024-03-02,Paid,Unfulfilled
"##;

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> String {
        format!("sheet-{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_seeded_orders_tab() {
        let id = id();
        let mut sheet = TestSheet::new(&id);
        let values = sheet.get(&"Orders!G2:G100".parse().unwrap()).await.unwrap();
        assert_eq!(
            values,
            vec![vec!["4.85".to_string()], vec![], vec!["XYZ".to_string()]]
        );
        let tabs = sheet.tabs().await.unwrap();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].title, "Orders");
    }

    #[tokio::test]
    async fn test_write_read_and_clear() {
        let id = id();
        let mut sheet = TestSheet::new(&id);
        let range: A1Range = "Orders!O2".parse().unwrap();
        sheet
            .write_ranges(&[SheetRange::new(
                range,
                vec![vec!["a".into(), "b".into()], vec!["c".into()]],
            )])
            .await
            .unwrap();
        assert_eq!(TestSheet::state(&id).writes, vec!["Orders!O2:P3"]);
        let got = sheet.get(&"Orders!O2:P3".parse().unwrap()).await.unwrap();
        assert_eq!(got, vec![vec!["a", "b"], vec!["c"]]);

        sheet
            .clear_ranges(&["Orders!O2:O3".parse().unwrap()])
            .await
            .unwrap();
        let got = sheet.get(&"Orders!O2:P3".parse().unwrap()).await.unwrap();
        assert_eq!(got, vec![vec!["", "b"]]);
    }

    #[tokio::test]
    async fn test_missing_tab_errors() {
        let mut sheet = TestSheet::new(id());
        assert!(sheet.get(&A1Range::tab("NOPE")).await.is_err());
        assert!(sheet
            .write_ranges(&[SheetRange::new(A1Range::tab("NOPE"), vec![vec!["x".into()]])])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_batch_update_adds_and_hides_tabs() {
        let id = id();
        let mut sheet = TestSheet::new(&id);
        sheet
            .batch_update(vec![serde_json::json!({
                "addSheet": {"properties": {"title": "METRICS"}}
            })])
            .await
            .unwrap();
        let tabs = sheet.tabs().await.unwrap();
        let metrics = tabs.iter().find(|t| t.title == "METRICS").unwrap();
        assert_eq!(metrics.sheet_id, 1);
        assert!(!metrics.hidden);

        sheet
            .batch_update(vec![serde_json::json!({
                "updateSheetProperties": {
                    "properties": {"sheetId": 1, "hidden": true},
                    "fields": "hidden"
                }
            })])
            .await
            .unwrap();
        assert!(sheet.tabs().await.unwrap()[1].hidden);
        assert_eq!(TestSheet::state(&id).requests.len(), 2);

        let again = sheet
            .batch_update(vec![serde_json::json!({
                "addSheet": {"properties": {"title": "METRICS"}}
            })])
            .await;
        assert!(again.is_err());
    }
}
