//! This module is responsible for reading, writing and managing the SQLite database. It is the
//! system of record for manual overrides and keeps a log of sync runs and formula changes.

mod migrations;

use crate::model::{Amount, ManualOverride, OverrideUpdate};
use crate::Result;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone)]
pub(crate) struct Db {
    pool: SqlitePool,
}

/// One completed sync, as recorded in `sync_runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub orders_before: i64,
    pub orders_after: i64,
    pub rows_written: i64,
    pub psl_backed_up: i64,
    pub psl_restored: i64,
}

/// How many formula changes are kept.
const CHANGE_LOG_LIMIT: i64 = 100;

/// A single-cell formula rewrite, with what the cell held before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaChange {
    pub id: i64,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
    /// An A1 cell, e.g. `Orders!P5`.
    pub cell: String,
    pub previous: String,
    pub formula: String,
}

impl Db {
    /// - Validates that no file currently exists at `path`
    /// - Creates a new SQLite file at `path`
    /// - Bootstraps `schema_version` and migrates to the current schema
    pub(crate) async fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            bail!("A database already exists at '{}'", path.display());
        }
        let pool = connect(path, true).await?;
        sqlx::query("CREATE TABLE schema_version (version INTEGER NOT NULL)")
            .execute(&pool)
            .await
            .context("Failed to create schema_version table")?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (0)")
            .execute(&pool)
            .await
            .context("Failed to insert initial schema version")?;
        migrations::run(&pool, 0, migrations::CURRENT_VERSION).await?;
        Ok(Self { pool })
    }

    /// - Validates that there is a SQLite file at `path`
    /// - Migrates the schema up if it is out-of-date
    pub(crate) async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("The database file is missing '{}'", path.display());
        }
        let pool = connect(path, false).await?;
        let (version,): (i32,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .context("Failed to read the schema version")?;
        if version > migrations::CURRENT_VERSION {
            bail!(
                "The database schema (version {version}) is newer than this program supports ({})",
                migrations::CURRENT_VERSION
            );
        }
        migrations::run(&pool, version, migrations::CURRENT_VERSION).await?;
        Ok(Self { pool })
    }

    pub(crate) async fn get_override(&self, order_id: &str) -> Result<Option<ManualOverride>> {
        let row = sqlx::query("SELECT * FROM manual_overrides WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query manual_overrides")?;
        row.map(|r| override_from_row(&r)).transpose()
    }

    /// All overrides ordered by order id.
    pub(crate) async fn overrides(&self) -> Result<Vec<ManualOverride>> {
        let rows = sqlx::query("SELECT * FROM manual_overrides ORDER BY order_id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query manual_overrides")?;
        rows.iter().map(override_from_row).collect()
    }

    /// Merges `update` into the stored override for `order_id` (creating it if needed) and
    /// returns the stored result.
    pub(crate) async fn upsert_override(
        &self,
        order_id: &str,
        update: OverrideUpdate,
    ) -> Result<ManualOverride> {
        let existing = self.get_override(order_id).await?;
        let merged = ManualOverride::merge(order_id, existing, update, Utc::now());
        sqlx::query(
            "INSERT INTO manual_overrides \
             (order_id, order_number, shipping_label_cost, psl, notes, updated_by, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(order_id) DO UPDATE SET \
             order_number = excluded.order_number, \
             shipping_label_cost = excluded.shipping_label_cost, \
             psl = excluded.psl, \
             notes = excluded.notes, \
             updated_by = excluded.updated_by, \
             updated_at = excluded.updated_at",
        )
        .bind(&merged.order_id)
        .bind(&merged.order_number)
        .bind(merged.shipping_label_cost.map(|c| c.value().to_string()))
        .bind(&merged.psl)
        .bind(&merged.notes)
        .bind(&merged.updated_by)
        .bind(merged.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save the override for order {order_id}"))?;
        debug!("Saved override for order {order_id}");
        Ok(merged)
    }

    pub(crate) async fn record_sync_run(&self, run: &SyncRun) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO sync_runs \
             (started_at, finished_at, orders_before, orders_after, rows_written, psl_backed_up, psl_restored) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.to_rfc3339())
        .bind(run.orders_before)
        .bind(run.orders_after)
        .bind(run.rows_written)
        .bind(run.psl_backed_up)
        .bind(run.psl_restored)
        .execute(&self.pool)
        .await
        .context("Failed to record the sync run")?;
        Ok(result.last_insert_rowid())
    }

    pub(crate) async fn last_sync_run(&self) -> Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query sync_runs")?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(SyncRun {
            started_at: parse_time(&row.try_get::<String, _>("started_at")?)?,
            finished_at: parse_time(&row.try_get::<String, _>("finished_at")?)?,
            orders_before: row.try_get("orders_before")?,
            orders_after: row.try_get("orders_after")?,
            rows_written: row.try_get("rows_written")?,
            psl_backed_up: row.try_get("psl_backed_up")?,
            psl_restored: row.try_get("psl_restored")?,
        }))
    }

    /// Logs a change and drops all but the newest `CHANGE_LOG_LIMIT`.
    pub(crate) async fn record_formula_change(
        &self,
        changed_by: &str,
        cell: &str,
        previous: &str,
        formula: &str,
    ) -> Result<FormulaChange> {
        let changed_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO formula_changes (changed_at, changed_by, cell, previous, formula) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(changed_at.to_rfc3339())
        .bind(changed_by)
        .bind(cell)
        .bind(previous)
        .bind(formula)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to log the change to {cell}"))?;
        sqlx::query(
            "DELETE FROM formula_changes WHERE id NOT IN \
             (SELECT id FROM formula_changes ORDER BY id DESC LIMIT ?)",
        )
        .bind(CHANGE_LOG_LIMIT)
        .execute(&self.pool)
        .await
        .context("Failed to trim formula_changes")?;
        Ok(FormulaChange {
            id: result.last_insert_rowid(),
            changed_at,
            changed_by: changed_by.to_string(),
            cell: cell.to_string(),
            previous: previous.to_string(),
            formula: formula.to_string(),
        })
    }

    /// The newest change that has not been reverted.
    pub(crate) async fn last_formula_change(&self) -> Result<Option<FormulaChange>> {
        let row = sqlx::query(
            "SELECT * FROM formula_changes WHERE reverted_at IS NULL ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query formula_changes")?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(FormulaChange {
            id: row.try_get("id")?,
            changed_at: parse_time(&row.try_get::<String, _>("changed_at")?)?,
            changed_by: row.try_get("changed_by")?,
            cell: row.try_get("cell")?,
            previous: row.try_get("previous")?,
            formula: row.try_get("formula")?,
        }))
    }

    pub(crate) async fn mark_reverted(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE formula_changes SET reverted_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to mark formula change {id} reverted"))?;
        Ok(())
    }
}

async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .context("Failed to parse SQLite connection string")?
        .create_if_missing(create);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open SQLite database at {}", path.display()))
}

fn override_from_row(row: &SqliteRow) -> Result<ManualOverride> {
    let cost: Option<String> = row.try_get("shipping_label_cost")?;
    let shipping_label_cost = cost
        .filter(|c| !c.is_empty())
        .map(|c| Amount::from_str(&c))
        .transpose()
        .context("Invalid shipping_label_cost in manual_overrides")?;
    Ok(ManualOverride {
        order_id: row.try_get("order_id")?,
        order_number: row.try_get("order_number")?,
        shipping_label_cost,
        psl: row.try_get("psl")?,
        notes: row.try_get("notes")?,
        updated_by: row.try_get("updated_by")?,
        updated_at: parse_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp '{s}' in database"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shopsync.sqlite");
        let db = Db::init(&path).await.unwrap();
        db.upsert_override("5001", OverrideUpdate::new("t").psl("XYZ"))
            .await
            .unwrap();
        drop(db);

        assert!(Db::init(&path).await.is_err());
        let db = Db::load(&path).await.unwrap();
        let found = db.get_override("5001").await.unwrap().unwrap();
        assert_eq!(found.psl.as_deref(), Some("XYZ"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(Db::load(dir.path().join("nope.sqlite")).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_merges() {
        let dir = TempDir::new().unwrap();
        let db = Db::init(dir.path().join("db.sqlite")).await.unwrap();
        db.upsert_override(
            "5001",
            OverrideUpdate::new("a")
                .order_number("#1042")
                .shipping_label_cost(Amount::from_cell("4.85")),
        )
        .await
        .unwrap();
        db.upsert_override("5001", OverrideUpdate::new("b").note("USPS ground"))
            .await
            .unwrap();
        let merged = db
            .upsert_override("5001", OverrideUpdate::new("c").note("fragile"))
            .await
            .unwrap();
        assert_eq!(merged.notes.as_deref(), Some("USPS ground\nfragile"));

        let stored = db.get_override("5001").await.unwrap().unwrap();
        assert_eq!(stored.order_number, "#1042");
        assert_eq!(stored.shipping_label_cost, Some(Amount::from_cell("4.85")));
        assert_eq!(stored.notes.as_deref(), Some("USPS ground\nfragile"));
        assert_eq!(stored.updated_by, "c");

        db.upsert_override("4000", OverrideUpdate::new("a").psl("P"))
            .await
            .unwrap();
        let all = db.overrides().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].order_id, "4000");
        assert!(db.get_override("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_runs() {
        let dir = TempDir::new().unwrap();
        let db = Db::init(dir.path().join("db.sqlite")).await.unwrap();
        assert!(db.last_sync_run().await.unwrap().is_none());
        let now = parse_time(&Utc::now().to_rfc3339()).unwrap();
        let run = SyncRun {
            started_at: now,
            finished_at: now,
            orders_before: 3,
            orders_after: 5,
            rows_written: 5,
            psl_backed_up: 2,
            psl_restored: 2,
        };
        db.record_sync_run(&run).await.unwrap();
        let second = SyncRun {
            orders_before: 5,
            ..run.clone()
        };
        db.record_sync_run(&second).await.unwrap();
        assert_eq!(db.last_sync_run().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_formula_changes() {
        let dir = TempDir::new().unwrap();
        let db = Db::init(dir.path().join("db.sqlite")).await.unwrap();
        assert!(db.last_formula_change().await.unwrap().is_none());

        let first = db
            .record_formula_change("a", "Orders!P5", "", "=P2-P4")
            .await
            .unwrap();
        let second = db
            .record_formula_change("b", "Orders!P6", "=SUM(I2:I4)", "=SUM(I2:I9)")
            .await
            .unwrap();
        let last = db.last_formula_change().await.unwrap().unwrap();
        assert_eq!(last.id, second.id);
        assert_eq!(last.previous, "=SUM(I2:I4)");
        assert_eq!(last.changed_by, "b");

        db.mark_reverted(second.id).await.unwrap();
        let last = db.last_formula_change().await.unwrap().unwrap();
        assert_eq!(last.id, first.id);
        assert_eq!(last.cell, "Orders!P5");
        db.mark_reverted(first.id).await.unwrap();
        assert!(db.last_formula_change().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_formula_changes_are_capped() {
        let dir = TempDir::new().unwrap();
        let db = Db::init(dir.path().join("db.sqlite")).await.unwrap();
        for i in 0..(CHANGE_LOG_LIMIT + 5) {
            db.record_formula_change("a", "Orders!P5", "", &format!("={i}"))
                .await
                .unwrap();
        }
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM formula_changes")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, CHANGE_LOG_LIMIT);
        let last = db.last_formula_change().await.unwrap().unwrap();
        assert_eq!(last.formula, format!("={}", CHANGE_LOG_LIMIT + 4));
    }
}
