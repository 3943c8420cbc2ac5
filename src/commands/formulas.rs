//! Handlers that rewrite single summary cells on the `Orders` tab. Formula fixes are logged so
//! the newest one can be reverted.

use crate::api::{Sheet, SheetRange};
use crate::commands::metrics::write_metrics;
use crate::commands::{read_raw_orders, Out, Session};
use crate::db::FormulaChange;
use crate::model::order::ORDERS_TAB;
use crate::model::{A1Range, Amount, Metrics, RowCol};
use crate::Result;
use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const NET_PROFIT_FORMULA: &str = "=P2-P4";

/// Used for the profit per shirt range when the `Orders` tab is empty.
const DEFAULT_LAST_ROW: usize = 100;

const NET_PROFIT_CELL: &str = "P5";
const PROFIT_PER_SHIRT_CELL: &str = "P6";
const SETUP_COSTS_CELL: &str = "P4";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaReport {
    pub cell: String,
    pub formula: String,
    /// What the cell held before, as written.
    pub previous: String,
    /// False when the cell already held `formula` and nothing was written.
    pub changed: bool,
}

async fn write_cell(sheet: &mut dyn Sheet, cell: &str, value: &str) -> Result<()> {
    let at: RowCol = cell.parse()?;
    sheet
        .write_ranges(&[SheetRange::new(
            A1Range::cell(ORDERS_TAB, at),
            vec![vec![value.to_string()]],
        )])
        .await
}

/// The formula (or value) in one cell, empty if the cell is blank.
async fn read_formula(sheet: &mut dyn Sheet, cell: &str) -> Result<String> {
    let at: RowCol = cell.parse()?;
    let values = sheet.get_formulas(&A1Range::cell(ORDERS_TAB, at)).await?;
    Ok(values
        .first()
        .and_then(|row| row.first())
        .cloned()
        .unwrap_or_default())
}

/// Writes `formula` to `cell` unless it is already there, and logs the change.
async fn fix(session: &mut Session, cell: &str, formula: String) -> Result<Out<FormulaReport>> {
    let db = session.config().db().clone();
    let actor = session.actor().to_string();
    let sheet = session.sheet().await?;
    let previous = read_formula(sheet, cell).await?;
    let mut report = FormulaReport {
        cell: format!("{ORDERS_TAB}!{cell}"),
        formula,
        previous,
        changed: false,
    };
    if report.previous == report.formula {
        debug!("{} already has {}", report.cell, report.formula);
        return Ok(Out::new(
            format!("{} already has {}", report.cell, report.formula),
            report,
        ));
    }

    write_cell(sheet, cell, &report.formula).await?;
    db.record_formula_change(&actor, &report.cell, &report.previous, &report.formula)
        .await?;
    report.changed = true;
    info!("Wrote {} to {}", report.formula, report.cell);
    Ok(Out::new(
        format!("Set {} to {}", report.cell, report.formula),
        report,
    ))
}

/// Puts back what the newest unreverted formula fix replaced.
pub async fn revert_last_change(session: &mut Session) -> Result<Out<FormulaChange>> {
    let db = session.config().db().clone();
    let Some(change) = db.last_formula_change().await? else {
        bail!("There is no formula change to revert");
    };
    let range: A1Range = change.cell.parse()?;
    session
        .sheet()
        .await?
        .write_ranges(&[SheetRange::new(range, vec![vec![change.previous.clone()]])])
        .await?;
    db.mark_reverted(change.id).await?;
    info!("Reverted {} to '{}'", change.cell, change.previous);

    let restored = if change.previous.is_empty() {
        "an empty cell".to_string()
    } else {
        change.previous.clone()
    };
    Ok(Out::new(
        format!("Reverted {} from {} to {restored}", change.cell, change.formula),
        change,
    ))
}

/// Writes `=P2-P4` to `Orders!P5`.
pub async fn fix_net_profit(session: &mut Session) -> Result<Out<FormulaReport>> {
    fix(session, NET_PROFIT_CELL, NET_PROFIT_FORMULA.to_string()).await
}

/// Writes `=SUM(I2:I{last_row})` to `Orders!P6`, where `last_row` is the number of rows in the
/// `Orders` tab.
pub async fn fix_profit_per_shirt(session: &mut Session) -> Result<Out<FormulaReport>> {
    let rows = session
        .sheet()
        .await?
        .get(&A1Range::columns(ORDERS_TAB, "A", "A", 1, 10_000)?)
        .await?
        .len();
    let last_row = if rows == 0 { DEFAULT_LAST_ROW } else { rows };
    fix(session, PROFIT_PER_SHIRT_CELL, format!("=SUM(I2:I{last_row})")).await
}

/// Stores `amount` as the `setup_costs` metric, writes it to `Orders!P4` and recomputes the
/// metrics.
pub async fn set_setup_costs(session: &mut Session, amount: Amount) -> Result<Out<Metrics>> {
    ensure!(!amount.is_negative(), "Setup costs cannot be negative");
    let db = session.config().db().clone();
    let sheet = session.sheet().await?;
    let value = amount.round().value();
    write_cell(sheet, SETUP_COSTS_CELL, &value.to_string()).await?;

    let rows = read_raw_orders(sheet).await?;
    let overrides = db.overrides().await?;
    let metrics = write_metrics(sheet, &rows, &overrides, value).await?;
    info!("Setup costs set to {value}");
    Ok(Out::new(
        format!("Set the setup costs (TOTAL COSTS) to {}", amount.round()),
        metrics,
    ))
}
