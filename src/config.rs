//! Configuration file handling.
//!
//! The configuration file is stored at `$SHOPSYNC_HOME/config.json` and holds the Google Sheet
//! URL, the Shopify store, the cost settings used when building rows, backup settings and the
//! locations of the credential files. A few values can be overridden from the environment.

use crate::backup::Backup;
use crate::db::Db;
use crate::{utils, Result};
use anyhow::{bail, Context};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

const APP_NAME: &str = "shopsync";
const CONFIG_VERSION: u8 = 1;
const BACKUP_COPIES: u32 = 5;
const SECRETS: &str = ".secrets";
const BACKUPS: &str = ".backups";
const CLIENT_SECRET_JSON: &str = "client_secret.json";
const TOKEN_JSON: &str = "token.json";
const SHOPIFY_JSON: &str = "shopify.json";
const CONFIG_JSON: &str = "config.json";
const SHOPSYNC_SQLITE: &str = "shopsync.sqlite";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";

pub(crate) const ENV_STORE_URL: &str = "SHOPIFY_STORE_URL";
pub(crate) const ENV_ACCESS_TOKEN: &str = "SHOPIFY_ACCESS_TOKEN";
pub(crate) const ENV_CLIENT_ID: &str = "SHOPIFY_CLIENT_ID";
pub(crate) const ENV_CLIENT_SECRET: &str = "SHOPIFY_CLIENT_SECRET";
pub(crate) const ENV_SPREADSHEET_ID: &str = "GOOGLE_SHEETS_SPREADSHEET_ID";

fn default_cost_per_shirt() -> Decimal {
    Decimal::new(1226, 2)
}

fn default_setup_costs() -> Decimal {
    Decimal::new(80932, 2)
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

/// What `Config::create` needs to set up a new home directory.
#[derive(Debug, Clone, Copy)]
pub struct InitOptions<'a> {
    /// The URL of the Google Sheet that receives the orders.
    pub sheet_url: &'a str,
    /// The Shopify store, e.g. `my-shop.myshopify.com`.
    pub store_url: &'a str,
    /// The downloaded Google OAuth client credentials. Copied into `.secrets/`.
    pub client_secret: &'a Path,
    /// Optional Shopify credentials (`access_token`, or `client_id` and `client_secret`). Copied
    /// into `.secrets/`.
    pub shopify_credentials: Option<&'a Path>,
}

/// Shopify credentials and ids taken from the environment. Anything set here wins over files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub store_url: Option<String>,
    pub access_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub spreadsheet_id: Option<String>,
}

impl EnvOverrides {
    /// Reads overrides through `lookup`, ignoring empty values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            store_url: get(ENV_STORE_URL),
            access_token: get(ENV_ACCESS_TOKEN),
            client_id: get(ENV_CLIENT_ID),
            client_secret: get(ENV_CLIENT_SECRET),
            spreadsheet_id: get(ENV_SPREADSHEET_ID),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$SHOPSYNC_HOME` and from there it loads `$SHOPSYNC_HOME/config.json`. It provides
/// paths to other items that are either configurable or are expected in a certain location within
/// the home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    backups: PathBuf,
    secrets: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    db: Db,
    spreadsheet_id: String,
    sqlite_path: PathBuf,
    env: EnvOverrides,
}

impl Config {
    /// Creates the home directory and its subdirectories, writes an initial `config.json`, copies
    /// the credential files into `.secrets/` and creates the SQLite database.
    pub async fn create(dir: impl Into<PathBuf>, opts: InitOptions<'_>) -> Result<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the shopsync home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let config_path = root.join(CONFIG_JSON);
        if config_path.exists() {
            bail!(
                "A config file already exists at '{}'",
                config_path.display()
            );
        }

        let backups_dir = root.join(BACKUPS);
        utils::make_dir(&backups_dir).await?;
        let secrets_dir = root.join(SECRETS);
        utils::make_dir(&secrets_dir).await?;

        utils::copy(opts.client_secret, secrets_dir.join(CLIENT_SECRET_JSON)).await?;
        if let Some(shopify) = opts.shopify_credentials {
            utils::copy(shopify, secrets_dir.join(SHOPIFY_JSON)).await?;
        }

        let spreadsheet_id = extract_spreadsheet_id(opts.sheet_url)
            .context("Failed to extract spreadsheet ID from sheet URL")?
            .to_string();

        let config_file = ConfigFile {
            sheet_url: opts.sheet_url.to_string(),
            store_url: normalize_store_url(opts.store_url),
            ..ConfigFile::default()
        };
        config_file.save(&config_path).await?;

        let sqlite_path = root.join(SHOPSYNC_SQLITE);
        let db = Db::init(&sqlite_path)
            .await
            .context("Unable to create SQLite DB")?;

        Ok(Self {
            root: root.clone(),
            backups: backups_dir,
            secrets: secrets_dir,
            config_path,
            config_file,
            db,
            spreadsheet_id,
            sqlite_path,
            env: EnvOverrides::default(),
        })
    }

    /// Validates and loads an existing home directory, migrating the database if needed, then
    /// applies environment overrides.
    pub async fn load(home: impl Into<PathBuf>) -> Result<Self> {
        let config = Self::load_without_env(home).await?;
        Ok(config.with_env(EnvOverrides::from_env()))
    }

    pub(crate) async fn load_without_env(home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("The shopsync home directory is missing")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;

        let spreadsheet_id = extract_spreadsheet_id(&config_file.sheet_url)
            .context("Failed to extract spreadsheet ID from sheet URL")?
            .to_string();

        let sqlite_path = root.join(SHOPSYNC_SQLITE);
        let db = Db::load(&sqlite_path)
            .await
            .context("Unable to load SQLite DB")?;

        let config = Self {
            root: root.clone(),
            backups: root.join(BACKUPS),
            secrets: root.join(SECRETS),
            config_path,
            config_file,
            db,
            spreadsheet_id,
            sqlite_path,
            env: EnvOverrides::default(),
        };
        if !config.backups.is_dir() {
            bail!(
                "The backups directory is missing '{}'",
                config.backups.display()
            )
        }
        if !config.secrets.is_dir() {
            bail!(
                "The secrets directory is missing '{}'",
                config.secrets.display()
            )
        }
        Ok(config)
    }

    /// Applies environment overrides. The spreadsheet id and store URL replace the configured
    /// ones; the Shopify credentials are kept for `shopify_credentials()`.
    pub fn with_env(mut self, env: EnvOverrides) -> Self {
        if let Some(id) = &env.spreadsheet_id {
            debug!("Using spreadsheet id from {ENV_SPREADSHEET_ID}");
            self.spreadsheet_id = id.clone();
        }
        if let Some(store) = &env.store_url {
            debug!("Using store URL from {ENV_STORE_URL}");
            self.config_file.store_url = normalize_store_url(store);
        }
        self.env = env;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    pub fn backups(&self) -> &Path {
        &self.backups
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    pub fn sheet_url(&self) -> &str {
        &self.config_file.sheet_url
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    /// The store host without scheme or trailing slash, e.g. `my-shop.myshopify.com`.
    pub fn store_url(&self) -> &str {
        &self.config_file.store_url
    }

    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    pub fn backup_copies(&self) -> u32 {
        self.config_file.backup_copies
    }

    pub fn cost_per_shirt(&self) -> Decimal {
        self.config_file.cost_per_shirt
    }

    pub fn setup_costs(&self) -> Decimal {
        self.config_file.setup_costs
    }

    pub fn listen_addr(&self) -> &str {
        &self.config_file.listen_addr
    }

    pub(crate) fn env(&self) -> &EnvOverrides {
        &self.env
    }

    pub fn backup(&self) -> Backup {
        Backup::new(self)
    }

    pub fn client_secret_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.client_secret_path())
    }

    pub fn token_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.token_path())
    }

    pub fn shopify_credentials_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.shopify_credentials_path())
    }

    fn resolve_secrets_file_path(&self, p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "shopsync",
///   "config_version": 1,
///   "sheet_url": "https://docs.google.com/spreadsheets/d/7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL",
///   "store_url": "my-shop.myshopify.com",
///   "backup_copies": 5,
///   "cost_per_shirt": "12.26",
///   "setup_costs": "809.32",
///   "listen_addr": "127.0.0.1:8000"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Always `shopsync`.
    app_name: String,

    config_version: u8,

    sheet_url: String,

    #[serde(default)]
    store_url: String,

    backup_copies: u32,

    /// Unit cost written to column H for every row.
    #[serde(default = "default_cost_per_shirt")]
    cost_per_shirt: Decimal,

    /// Used for `TOTAL COSTS` when the METRICS tab has no `setup_costs` yet.
    #[serde(default = "default_setup_costs")]
    setup_costs: Decimal,

    #[serde(default = "default_listen_addr")]
    listen_addr: String,

    /// Relative to the home directory, or absolute. Defaults to `.secrets/client_secret.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret_path: Option<PathBuf>,

    /// Defaults to `.secrets/token.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,

    /// Defaults to `.secrets/shopify.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    shopify_credentials_path: Option<PathBuf>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            sheet_url: String::new(),
            store_url: String::new(),
            backup_copies: BACKUP_COPIES,
            cost_per_shirt: default_cost_per_shirt(),
            setup_costs: default_setup_costs(),
            listen_addr: default_listen_addr(),
            client_secret_path: None,
            token_path: None,
            shopify_credentials_path: None,
        }
    }
}

impl ConfigFile {
    async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path)
            .await
            .with_context(|| format!("Failed to load config file at {}", path.display()))?;
        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        Ok(config)
    }

    async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(path.as_ref(), data)
            .await
            .context("Unable to write config file")
    }

    fn client_secret_path(&self) -> PathBuf {
        self.client_secret_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON))
    }

    fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(TOKEN_JSON))
    }

    fn shopify_credentials_path(&self) -> PathBuf {
        self.shopify_credentials_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(SHOPIFY_JSON))
    }
}

/// Strips the scheme and any trailing slash: `https://shop.myshopify.com/` becomes
/// `shop.myshopify.com`.
pub(crate) fn normalize_store_url(url: &str) -> String {
    let url = url.trim();
    let url = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    url.trim_end_matches('/').to_string()
}

/// Extracts the spreadsheet ID from a Google Sheets URL such as
/// `https://docs.google.com/spreadsheets/d/SPREADSHEET_ID/edit`. An empty URL gives an empty id.
fn extract_spreadsheet_id(url: &str) -> Result<&str> {
    if url.is_empty() {
        return Ok(url);
    }
    let parts: Vec<&str> = url.split('/').collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == "d" && i + 1 < parts.len() {
            let id_part = parts[i + 1];
            let id = id_part
                .split(['?', '#'])
                .next()
                .unwrap_or(id_part);
            return Ok(id);
        }
    }
    Err(anyhow::anyhow!(
        "Invalid Google Sheets URL format. Expected: https://docs.google.com/spreadsheets/d/SPREADSHEET_ID"
    ))
}

impl FromStr for EnvOverrides {
    type Err = anyhow::Error;

    /// Parses `KEY=VALUE` lines, the format of a `.env` file. Blank lines and `#` comments are
    /// skipped.
    fn from_str(s: &str) -> Result<Self> {
        let mut pairs = std::collections::HashMap::new();
        for line in s.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .with_context(|| format!("Expected KEY=VALUE, got '{line}'"))?;
            pairs.insert(
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
        Ok(Self::from_lookup(|key| pairs.get(key).cloned()))
    }
}
