//! Rotating JSON backups in `$SHOPSYNC_HOME/.backups`.

use crate::{utils, Config, Result};
use anyhow::Context;
use chrono::{Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

/// Prefix for PSL column backups.
pub const PSL: &str = "psl";

const JSON: &str = "json";

/// Writes and finds backup files named `{prefix}.YYYY-MM-DD-NNN.json`, keeping at most
/// `backup_copies` files per prefix. Create one with `Config::backup()`.
#[derive(Debug, Clone)]
pub struct Backup {
    backups_dir: PathBuf,
    backup_copies: u32,
}

impl Backup {
    pub fn new(config: &Config) -> Self {
        Self {
            backups_dir: config.backups().to_path_buf(),
            backup_copies: config.backup_copies(),
        }
    }

    /// Writes `data` as pretty JSON to the next file in the sequence for today, then rotates.
    /// Returns the path of the new file.
    pub async fn save_json<T: Serialize>(&self, prefix: &str, data: &T) -> Result<PathBuf> {
        let date = today();
        let seq = self.next_sequence_number(prefix, date).await?;
        let path = self
            .backups_dir
            .join(format!("{prefix}.{date}-{seq:03}.{JSON}"));

        let json = serde_json::to_string_pretty(data)
            .with_context(|| format!("Failed to serialize the {prefix} backup"))?;
        utils::write(&path, json).await?;

        self.rotate(prefix).await?;
        Ok(path)
    }

    /// Loads the newest backup for `prefix`, or `None` if there is none.
    pub async fn latest_json<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Option<(PathBuf, T)>> {
        let files = self.list(prefix).await?;
        let Some((path, _)) = files.into_iter().last() else {
            return Ok(None);
        };
        let data = utils::deserialize(&path).await?;
        Ok(Some((path, data)))
    }

    async fn next_sequence_number(&self, prefix: &str, date: NaiveDate) -> Result<u32> {
        let max_seq = self
            .list(prefix)
            .await?
            .iter()
            .filter(|(_, (day, _))| *day == date)
            .map(|(_, (_, seq))| *seq)
            .max()
            .unwrap_or(0);
        Ok(max_seq + 1)
    }

    /// Backup files for `prefix`, oldest first by date then sequence number.
    async fn list(&self, prefix: &str) -> Result<Vec<(PathBuf, (NaiveDate, u32))>> {
        let mut files = Vec::new();
        let mut dir = utils::read_dir(&self.backups_dir).await?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(key) = parse_backup_name(&name, prefix) {
                files.push((entry.path(), key));
            }
        }
        files.sort_by_key(|(_, key)| *key);
        Ok(files)
    }

    async fn rotate(&self, prefix: &str) -> Result<()> {
        let files = self.list(prefix).await?;
        let to_delete = files.len().saturating_sub(self.backup_copies as usize);
        for (path, _) in files.into_iter().take(to_delete) {
            utils::remove(&path).await?;
        }
        Ok(())
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// `psl.2025-12-14-042.json` with prefix `psl` gives `Some((2025-12-14, 42))`.
fn parse_backup_name(filename: &str, prefix: &str) -> Option<(NaiveDate, u32)> {
    let stem = filename
        .strip_prefix(&format!("{prefix}."))?
        .strip_suffix(&format!(".{JSON}"))?;
    let (date, seq) = stem.rsplit_once('-')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((date, seq.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;
    use std::collections::BTreeMap;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_backup_name() {
        assert_eq!(
            parse_backup_name("psl.2025-12-14-001.json", "psl"),
            Some((day("2025-12-14"), 1))
        );
        assert_eq!(
            parse_backup_name("psl.2025-12-14-1000.json", "psl"),
            Some((day("2025-12-14"), 1000))
        );
        assert_eq!(parse_backup_name("other.2025-12-14-001.json", "psl"), None);
        assert_eq!(parse_backup_name("pslx.2025-12-14-001.json", "psl"), None);
        assert_eq!(parse_backup_name("psl.2025-12-14-001.txt", "psl"), None);
        assert_eq!(parse_backup_name("psl.notes.json", "psl"), None);
    }

    #[tokio::test]
    async fn test_sequence_past_999_sorts_numerically() {
        let env = TestEnv::new().await;
        let backup = env.config().backup();
        let dir = env.config().backups().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        for (name, n) in [
            ("psl.2025-12-14-999.json", 999),
            ("psl.2025-12-14-1000.json", 1000),
            ("psl.2025-12-14-998.json", 998),
        ] {
            std::fs::write(dir.join(name), format!("{{\"n\": {n}}}")).unwrap();
        }

        let (path, data): (PathBuf, BTreeMap<String, u32>) =
            backup.latest_json(PSL).await.unwrap().unwrap();
        assert_eq!(path, dir.join("psl.2025-12-14-1000.json"));
        assert_eq!(data["n"], 1000);

        let keys: Vec<u32> = backup
            .list(PSL)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, (_, seq))| seq)
            .collect();
        assert_eq!(keys, vec![998, 999, 1000]);

        std::fs::write(dir.join("psl.2025-12-15-002.json"), "{\"n\": 2}").unwrap();
        let (_, data): (PathBuf, BTreeMap<String, u32>) =
            backup.latest_json(PSL).await.unwrap().unwrap();
        assert_eq!(data["n"], 2);
    }

    #[tokio::test]
    async fn test_save_rotate_and_latest() {
        let env = TestEnv::new().await;
        let backup = env.config().backup();
        assert!(backup
            .latest_json::<BTreeMap<String, u32>>(PSL)
            .await
            .unwrap()
            .is_none());

        let copies = env.config().backup_copies() as usize;
        let mut last = PathBuf::new();
        for i in 0..(copies as u32 + 2) {
            let data = BTreeMap::from([("n".to_string(), i)]);
            last = backup.save_json(PSL, &data).await.unwrap();
        }

        let files = backup.list(PSL).await.unwrap();
        assert_eq!(files.len(), copies);

        let (path, data): (PathBuf, BTreeMap<String, u32>) =
            backup.latest_json(PSL).await.unwrap().unwrap();
        assert_eq!(path, last);
        assert_eq!(data["n"], copies as u32 + 1);
    }
}
