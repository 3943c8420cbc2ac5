//! The two remote systems this program talks to, each behind a trait so that the whole program
//! can run against in-memory doubles:
//! - `Sheet`: the Google spreadsheet (values, tabs, `batchUpdate` formatting requests).
//! - `Shop`: the Shopify Admin REST API (orders and products).

mod files;
mod oauth;
mod shop_test_client;
mod sheet;
mod sheet_test_client;
mod shopify;

use crate::model::{A1Range, ShopOrder, ShopProduct};
use crate::{Config, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

pub(crate) use oauth::{run_consent_flow, TokenProvider};
#[cfg(test)]
pub(crate) use shop_test_client::TestShop;
#[cfg(test)]
pub(crate) use sheet_test_client::TestSheet;

/// OAuth scopes required for reading and writing the spreadsheet.
pub(crate) const OAUTH_SCOPES: &[&str] = &["https://www.googleapis.com/auth/spreadsheets"];

/// Set this environment variable to anything non-empty to run against in-memory doubles.
pub const TEST_MODE_ENV: &str = "SHOPSYNC_IN_TEST_MODE";

/// Whether to talk to Google and Shopify or to the in-memory doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Testing,
}

impl Mode {
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(v) if !v.is_empty() => Mode::Testing,
            _ => Mode::Live,
        }
    }
}

/// Values to write, anchored at the start of `range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SheetRange {
    pub(crate) range: A1Range,
    pub(crate) values: Vec<Vec<String>>,
}

impl SheetRange {
    pub(crate) fn new(range: A1Range, values: Vec<Vec<String>>) -> Self {
        Self { range, values }
    }
}

/// A tab (Google calls it a sheet) in the spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tab {
    pub(crate) sheet_id: i64,
    pub(crate) title: String,
    pub(crate) hidden: bool,
}

/// The spreadsheet operations the handlers need.
#[async_trait::async_trait]
pub(crate) trait Sheet: Send {
    /// Formatted values in `range`. Trailing empty rows and cells are omitted, like the API does.
    async fn get(&mut self, range: &A1Range) -> Result<Vec<Vec<String>>>;

    /// Like `get`, but formulas are returned as written rather than evaluated.
    async fn get_formulas(&mut self, range: &A1Range) -> Result<Vec<Vec<String>>>;

    async fn clear_ranges(&mut self, ranges: &[A1Range]) -> Result<()>;

    /// Writes every range in one request, as a user would type them (formulas are parsed).
    async fn write_ranges(&mut self, data: &[SheetRange]) -> Result<()>;

    async fn tabs(&mut self) -> Result<Vec<Tab>>;

    /// Sends raw `spreadsheets.batchUpdate` requests (formatting, tab properties).
    async fn batch_update(&mut self, requests: Vec<Value>) -> Result<()>;
}

/// The Shopify operations the handlers need.
#[async_trait::async_trait]
pub(crate) trait Shop: Send {
    /// Every order in the store, any status.
    async fn orders(&mut self) -> Result<Vec<ShopOrder>>;

    async fn products(&mut self) -> Result<Vec<ShopProduct>>;
}

/// Creates the `Sheet` for `mode`.
pub(crate) async fn sheet(config: &Config, mode: Mode) -> Result<Box<dyn Sheet>> {
    match mode {
        Mode::Live => {
            let token_provider =
                TokenProvider::load(config.client_secret_path(), config.token_path()).await?;
            Ok(Box::new(
                sheet::GoogleSheet::new(config.spreadsheet_id(), token_provider).await?,
            ))
        }
        Mode::Testing => {
            debug!("Using the in-memory sheet for {}", config.spreadsheet_id());
            Ok(Box::new(sheet_test_client::TestSheet::new(
                config.spreadsheet_id(),
            )))
        }
    }
}

/// Creates the `Shop` for `mode`.
pub(crate) async fn shop(config: &Config, mode: Mode) -> Result<Box<dyn Shop>> {
    match mode {
        Mode::Live => Ok(Box::new(shopify::ShopifyClient::connect(config).await?)),
        Mode::Testing => {
            debug!("Using the in-memory shop for {}", config.store_url());
            Ok(Box::new(shop_test_client::TestShop::new(config.store_url())))
        }
    }
}

/// Returns the tab called `title`, adding it if it does not exist.
pub(crate) async fn ensure_tab(sheet: &mut dyn Sheet, title: &str, hidden: bool) -> Result<Tab> {
    if let Some(tab) = sheet.tabs().await?.into_iter().find(|t| t.title == title) {
        return Ok(tab);
    }
    info!("Adding the {title} tab");
    sheet
        .batch_update(vec![json!({
            "addSheet": {"properties": {"title": title, "hidden": hidden}}
        })])
        .await?;
    sheet
        .tabs()
        .await?
        .into_iter()
        .find(|t| t.title == title)
        .ok_or_else(|| anyhow::anyhow!("The {title} tab was not created"))
}

/// Clears the whole tab and writes `values` from `A1`.
pub(crate) async fn replace_tab(
    sheet: &mut dyn Sheet,
    title: &str,
    values: Vec<Vec<String>>,
) -> Result<()> {
    sheet.clear_ranges(&[A1Range::tab(title)]).await?;
    sheet
        .write_ranges(&[SheetRange::new(
            A1Range::cell(title, crate::model::RowCol(0, 0)),
            values,
        )])
        .await
}
