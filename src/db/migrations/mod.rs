//! Schema migrations for `shopsync.sqlite`.
//!
//! Each version has a pair of files in this directory:
//! - `migration_NN_up.sql` takes the schema from `NN-1` to `NN`
//! - `migration_NN_down.sql` takes it from `NN` back to `NN-1`

use anyhow::{bail, Context};
use sqlx::{Executor, SqlitePool};
use tracing::debug;

use crate::Result;

struct Migration {
    /// The schema version after running `up_sql`.
    version: i32,
    up_sql: &'static str,
    down_sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        up_sql: include_str!("migration_01_up.sql"),
        down_sql: include_str!("migration_01_down.sql"),
    },
    Migration {
        version: 2,
        up_sql: include_str!("migration_02_up.sql"),
        down_sql: include_str!("migration_02_down.sql"),
    },
    Migration {
        version: 3,
        up_sql: include_str!("migration_03_up.sql"),
        down_sql: include_str!("migration_03_down.sql"),
    },
];

/// The version a fully migrated database is at.
pub(crate) const CURRENT_VERSION: i32 = 3;

/// Moves the schema from `current_ver` to `target_ver`, one version at a time and in either
/// direction. Every step runs in its own transaction together with the `schema_version` update.
/// Fails before touching the database if any step is missing.
pub(crate) async fn run(pool: &SqlitePool, current_ver: i32, target_ver: i32) -> Result<()> {
    if current_ver == target_ver {
        debug!("Schema already at version {target_ver}");
        return Ok(());
    }
    validate_migrations(current_ver, target_ver)?;

    if current_ver < target_ver {
        for version in (current_ver + 1)..=target_ver {
            let migration = find(version)?;
            debug!("Applying migration {version:02} (up)");
            run_single_migration(pool, migration.up_sql, version).await?;
        }
    } else {
        for version in (target_ver + 1..=current_ver).rev() {
            let migration = find(version)?;
            debug!("Reverting migration {version:02} (down)");
            run_single_migration(pool, migration.down_sql, version - 1).await?;
        }
    }

    debug!("Schema now at version {target_ver}");
    Ok(())
}

fn find(version: i32) -> Result<&'static Migration> {
    MIGRATIONS
        .iter()
        .find(|m| m.version == version)
        .with_context(|| format!("Migration {version} not found"))
}

async fn run_single_migration(pool: &SqlitePool, sql: &str, new_version: i32) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin migration transaction")?;

    tx.execute(sql)
        .await
        .context("Failed to execute migration SQL")?;

    sqlx::query("DELETE FROM schema_version")
        .execute(&mut *tx)
        .await
        .context("Failed to clear schema_version")?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(new_version)
        .execute(&mut *tx)
        .await
        .context("Failed to update schema_version")?;

    tx.commit()
        .await
        .context("Failed to commit migration transaction")?;
    Ok(())
}

fn validate_migrations(current_version: i32, target_version: i32) -> Result<()> {
    let (start, end) = if current_version < target_version {
        (current_version + 1, target_version)
    } else {
        (target_version + 1, current_version)
    };
    for version in start..=end {
        if !MIGRATIONS.iter().any(|m| m.version == version) {
            bail!(
                "Migration {version} is missing but required to migrate from version {current_version} to {target_version}"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tempfile::TempDir;

    /// A fresh database with `schema_version` at 0.
    async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let db_path = temp_dir.path().join("test.sqlite");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .context("Failed to parse SQLite connection string")?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to create SQLite database")?;
        sqlx::query("CREATE TABLE schema_version (version INTEGER NOT NULL)")
            .execute(&pool)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (0)")
            .execute(&pool)
            .await?;
        Ok((temp_dir, pool))
    }

    async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
        let row: (i32,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }

    async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let row: (i32,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?")
                .bind(table_name)
                .fetch_one(pool)
                .await?;
        Ok(row.0 > 0)
    }

    #[tokio::test]
    async fn test_migrate_up_creates_tables() {
        let (_temp_dir, pool) = create_test_db().await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), 0);

        run(&pool, 0, CURRENT_VERSION).await.unwrap();

        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_VERSION);
        assert!(table_exists(&pool, "manual_overrides").await.unwrap());
        assert!(table_exists(&pool, "sync_runs").await.unwrap());
        assert!(table_exists(&pool, "formula_changes").await.unwrap());
    }

    #[tokio::test]
    async fn test_migrate_one_step_at_a_time() {
        let (_temp_dir, pool) = create_test_db().await.unwrap();
        run(&pool, 0, 1).await.unwrap();
        assert!(table_exists(&pool, "manual_overrides").await.unwrap());
        assert!(!table_exists(&pool, "sync_runs").await.unwrap());
        run(&pool, 1, 2).await.unwrap();
        assert!(table_exists(&pool, "sync_runs").await.unwrap());
        assert!(!table_exists(&pool, "formula_changes").await.unwrap());
        run(&pool, 2, 3).await.unwrap();
        assert!(table_exists(&pool, "formula_changes").await.unwrap());
    }

    #[tokio::test]
    async fn test_migrate_down_drops_tables() {
        let (_temp_dir, pool) = create_test_db().await.unwrap();
        run(&pool, 0, CURRENT_VERSION).await.unwrap();

        run(&pool, CURRENT_VERSION, 1).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), 1);
        assert!(!table_exists(&pool, "formula_changes").await.unwrap());
        assert!(!table_exists(&pool, "sync_runs").await.unwrap());
        assert!(table_exists(&pool, "manual_overrides").await.unwrap());

        run(&pool, 1, 0).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), 0);
        assert!(!table_exists(&pool, "manual_overrides").await.unwrap());
    }

    #[tokio::test]
    async fn test_migrate_no_op_at_target() {
        let (_temp_dir, pool) = create_test_db().await.unwrap();
        run(&pool, 0, 2).await.unwrap();
        run(&pool, 2, 2).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), 2);
    }

    #[test]
    fn test_validate_migrations() {
        assert!(validate_migrations(0, 3).is_ok());
        assert!(validate_migrations(3, 0).is_ok());
        assert!(validate_migrations(0, 4).is_err());
        assert!(validate_migrations(4, 1).is_err());
    }
}
