//! Implements the `Sheet` trait using the `sheets::Client` for values and `reqwest` for the
//! spreadsheet metadata and `batchUpdate` endpoints, which the `sheets` crate does not cover well.

use crate::api::{Sheet, SheetRange, Tab, TokenProvider};
use crate::model::A1Range;
use crate::Result;
use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::{json, Value};
use sheets::types::{
    BatchClearValuesRequest, BatchUpdateValuesRequest, DateTimeRenderOption, Dimension,
    ValueInputOption, ValueRange, ValueRenderOption,
};
use tracing::{debug, trace};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Talks to Google. The `TokenProvider` is asked for a fresh access token before each call, which
/// refreshes it when it is close to expiring.
pub(super) struct GoogleSheet {
    spreadsheet_id: String,
    token_provider: TokenProvider,
    client: sheets::Client,
    http: reqwest::Client,
}

impl GoogleSheet {
    pub(super) async fn new(
        spreadsheet_id: impl Into<String>,
        mut token_provider: TokenProvider,
    ) -> Result<Self> {
        let client = create_sheets_client(&mut token_provider).await?;
        Ok(Self {
            spreadsheet_id: spreadsheet_id.into(),
            token_provider,
            client,
            http: reqwest::Client::new(),
        })
    }

    async fn refresh_client(&mut self) -> Result<()> {
        self.client = create_sheets_client(&mut self.token_provider).await?;
        Ok(())
    }

    async fn values(
        &mut self,
        range: &A1Range,
        render: ValueRenderOption,
    ) -> Result<Vec<Vec<String>>> {
        self.refresh_client().await?;
        let range = range.to_string();
        let response = self
            .client
            .spreadsheets()
            .values_get(
                &self.spreadsheet_id,
                &range,
                DateTimeRenderOption::FormattedString,
                Dimension::Rows,
                render,
            )
            .await
            .map_err(anyhow::Error::from)
            .with_context(|| format!("Failed to read {range}"))?;
        Ok(response.body.values)
    }
}

#[async_trait::async_trait]
impl Sheet for GoogleSheet {
    async fn get(&mut self, range: &A1Range) -> Result<Vec<Vec<String>>> {
        trace!("get {range}");
        self.values(range, ValueRenderOption::FormattedValue).await
    }

    async fn get_formulas(&mut self, range: &A1Range) -> Result<Vec<Vec<String>>> {
        trace!("get_formulas {range}");
        self.values(range, ValueRenderOption::Formula).await
    }

    async fn clear_ranges(&mut self, ranges: &[A1Range]) -> Result<()> {
        if ranges.is_empty() {
            return Ok(());
        }
        self.refresh_client().await?;
        let request = BatchClearValuesRequest {
            ranges: ranges.iter().map(|r| r.to_string()).collect(),
        };
        self.client
            .spreadsheets()
            .values_batch_clear(&self.spreadsheet_id, &request)
            .await
            .map_err(anyhow::Error::from)
            .with_context(|| format!("Failed to clear ranges: {:?}", request.ranges))?;
        Ok(())
    }

    async fn write_ranges(&mut self, data: &[SheetRange]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.refresh_client().await?;
        let value_ranges: Vec<ValueRange> = data
            .iter()
            .map(|sr| ValueRange {
                major_dimension: Some(Dimension::Rows),
                range: sr.range.to_string(),
                values: sr.values.clone(),
            })
            .collect();
        debug!("Writing {} ranges", value_ranges.len());

        let request = BatchUpdateValuesRequest {
            data: value_ranges,
            include_values_in_response: Some(false),
            response_date_time_render_option: None,
            response_value_render_option: None,
            value_input_option: Some(ValueInputOption::UserEntered),
        };
        self.client
            .spreadsheets()
            .values_batch_update(&self.spreadsheet_id, &request)
            .await
            .map_err(anyhow::Error::from)
            .context("Failed to write ranges")?;
        Ok(())
    }

    async fn tabs(&mut self) -> Result<Vec<Tab>> {
        let token = self.token_provider.token_with_refresh().await?;
        let url = format!(
            "{SHEETS_API}/{}?fields=sheets.properties(sheetId,title,hidden)",
            self.spreadsheet_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to request the spreadsheet metadata")?;
        let body: Metadata = checked_json(response, "spreadsheets.get").await?;
        Ok(body
            .sheets
            .into_iter()
            .map(|s| Tab {
                sheet_id: s.properties.sheet_id,
                title: s.properties.title,
                hidden: s.properties.hidden,
            })
            .collect())
    }

    async fn batch_update(&mut self, requests: Vec<Value>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let token = self.token_provider.token_with_refresh().await?;
        let url = format!("{SHEETS_API}/{}:batchUpdate", self.spreadsheet_id);
        debug!("Sending {} batchUpdate requests", requests.len());
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .context("Failed to send the batchUpdate request")?;
        let _: Value = checked_json(response, "spreadsheets.batchUpdate").await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct Metadata {
    #[serde(default)]
    sheets: Vec<MetadataSheet>,
}

#[derive(Deserialize)]
struct MetadataSheet {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    #[serde(default)]
    sheet_id: i64,
    title: String,
    #[serde(default)]
    hidden: bool,
}

async fn checked_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        bail!("Google Sheets {what} failed with status {status}: {body}");
    }
    response
        .json()
        .await
        .with_context(|| format!("Failed to parse the {what} response"))
}

async fn create_sheets_client(token_provider: &mut TokenProvider) -> Result<sheets::Client> {
    let access_token = token_provider.token_with_refresh().await?;
    // The client id, secret and redirect are only needed for the `sheets` crate's own OAuth flow,
    // which we do not use.
    Ok(sheets::Client::new(
        String::new(),
        String::new(),
        String::new(),
        access_token,
        String::new(),
    ))
}
