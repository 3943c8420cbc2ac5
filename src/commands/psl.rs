//! Backing up, restoring and migrating the PSL column of the `Orders` tab.

use crate::api::{Sheet, SheetRange};
use crate::backup::PSL;
use crate::commands::overrides::publish_overrides;
use crate::commands::{read_raw_orders, Out, Session};
use crate::model::order::ORDERS_TAB;
use crate::model::psl::{PSL_COLUMN, PSL_FIRST_ROW, PSL_LAST_ROW};
use crate::model::{column_index, A1Range, OverrideUpdate, PslBackup, PslValues, RowCol};
use crate::Result;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PslBackupReport {
    pub backed_up: usize,
    /// `None` when there was nothing to back up.
    pub path: Option<String>,
    #[serde(skip)]
    pub values: PslValues,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PslRestoreReport {
    pub restored: usize,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PslMigrateReport {
    pub migrated: usize,
    /// Orders that already had a PSL override.
    pub skipped: usize,
    /// Rows whose order could not be found in `RAW_ORDERS`.
    pub unmatched: usize,
}

fn psl_range() -> Result<A1Range> {
    A1Range::columns(ORDERS_TAB, PSL_COLUMN, PSL_COLUMN, PSL_FIRST_ROW, PSL_LAST_ROW)
}

/// Reads `Orders!G2:G100`.
pub(crate) async fn read_psl(sheet: &mut dyn Sheet) -> Result<PslValues> {
    let column = sheet.get(&psl_range()?).await?;
    Ok(PslValues::from_column(PSL_FIRST_ROW, &column))
}

/// Writes every value to `G{row}` in one request and returns how many were written.
pub(crate) async fn write_psl(sheet: &mut dyn Sheet, values: &PslValues) -> Result<usize> {
    if values.is_empty() {
        return Ok(0);
    }
    let col = column_index(PSL_COLUMN)?;
    let data: Vec<SheetRange> = values
        .iter()
        .map(|(row, value)| {
            SheetRange::new(
                A1Range::cell(ORDERS_TAB, RowCol::new(row - 1, col)),
                vec![vec![value.to_string()]],
            )
        })
        .collect();
    sheet.write_ranges(&data).await?;
    Ok(data.len())
}

/// Saves the PSL column to `.backups/psl.YYYY-MM-DD-NNN.json`. Writes no file when the column is
/// empty.
pub async fn backup_psl(session: &mut Session) -> Result<Out<PslBackupReport>> {
    let backup = session.config().backup();
    let values = read_psl(session.sheet().await?).await?;
    if values.is_empty() {
        info!("No PSL values found to back up");
        return Ok(Out::new(
            "No PSL values found to back up",
            PslBackupReport {
                backed_up: 0,
                path: None,
                values,
            },
        ));
    }

    let count = values.len();
    let path = backup
        .save_json(PSL, &PslBackup::new(ORDERS_TAB, values.clone()))
        .await?;
    debug!("Saved PSL backup to {}", path.display());
    Ok(Out::new(
        format!("Backed up {count} PSL values to {}", path.display()),
        PslBackupReport {
            backed_up: count,
            path: Some(path.display().to_string()),
            values,
        },
    ))
}

/// Writes the newest PSL backup back into the column.
pub async fn restore_psl(session: &mut Session) -> Result<Out<PslRestoreReport>> {
    let Some((path, backup)) = session
        .config()
        .backup()
        .latest_json::<PslBackup>(PSL)
        .await?
    else {
        bail!("No PSL backup found");
    };
    let restored = write_psl(session.sheet().await?, &backup.values).await?;
    Ok(Out::new(
        format!(
            "Restored {restored} PSL values from {} (taken {})",
            path.display(),
            backup.taken_at.format("%Y-%m-%d %H:%M UTC")
        ),
        PslRestoreReport {
            restored,
            path: path.display().to_string(),
        },
    ))
}

/// Moves PSL values from the sheet into manual overrides. `Orders` row `r` and `RAW_ORDERS` row
/// `r` describe the same line item, which is how a row finds its order id. Orders that already
/// have a PSL override keep it.
pub async fn migrate_psl(session: &mut Session) -> Result<Out<PslMigrateReport>> {
    let db = session.config().db().clone();
    let actor = session.actor().to_string();
    let sheet = session.sheet().await?;
    let values = read_psl(sheet).await?;
    let rows = read_raw_orders(sheet).await?;
    if !values.is_empty() && rows.is_empty() {
        bail!("RAW_ORDERS is empty; run a sync first");
    }

    let mut report = PslMigrateReport::default();
    for (row, value) in values.iter() {
        let Some(order) = row.checked_sub(2).and_then(|i| rows.get(i)) else {
            report.unmatched += 1;
            continue;
        };
        let existing = db.get_override(&order.order_id).await?;
        if existing.and_then(|o| o.psl).is_some_and(|p| !p.is_empty()) {
            report.skipped += 1;
            continue;
        }
        db.upsert_override(
            &order.order_id,
            OverrideUpdate::new(actor.as_str())
                .order_number(order.order_number.as_str())
                .psl(value),
        )
        .await?;
        report.migrated += 1;
    }

    if report.migrated > 0 {
        publish_overrides(sheet, &db).await?;
    }
    info!(
        "Migrated {} PSL values ({} skipped, {} unmatched)",
        report.migrated, report.skipped, report.unmatched
    );
    Ok(Out::new(
        format!(
            "Migrated {} PSL values to manual overrides ({} already set, {} without an order)",
            report.migrated, report.skipped, report.unmatched
        ),
        report,
    ))
}
