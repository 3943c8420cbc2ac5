//! Implements the `Shop` trait with the Shopify Admin REST API.

use crate::api::files::ShopifySecret;
use crate::api::Shop;
use crate::model::{ShopOrder, ShopProduct};
use crate::{Config, Result};
use anyhow::{bail, Context};
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const API_VERSION: &str = "2024-01";
const PAGE_LIMIT: u32 = 250;
const MAX_RETRIES: u32 = 3;
/// Shopify allows two requests per second.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How we authenticate with the store.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Credentials {
    AccessToken(String),
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
}

impl Credentials {
    /// An access token wins over app credentials.
    fn resolve(secret: ShopifySecret) -> Result<Self> {
        if let Some(token) = secret.access_token {
            return Ok(Credentials::AccessToken(token));
        }
        match (secret.client_id, secret.client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(Credentials::ClientCredentials {
                client_id,
                client_secret,
            }),
            _ => bail!(
                "No Shopify credentials found. Set SHOPIFY_ACCESS_TOKEN, or SHOPIFY_CLIENT_ID and \
                SHOPIFY_CLIENT_SECRET, or add them to .secrets/shopify.json"
            ),
        }
    }
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
}

pub(super) struct ShopifyClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    last_request: Option<Instant>,
}

impl ShopifyClient {
    /// Resolves credentials from `shopify.json` and the environment, exchanging app credentials
    /// for an access token if that is what we have.
    pub(super) async fn connect(config: &Config) -> Result<Self> {
        let store = config.store_url();
        if store.is_empty() {
            bail!("No Shopify store is configured. Set SHOPIFY_STORE_URL or store_url in config.json");
        }
        let env = config.env();
        let secret = ShopifySecret::load_if_exists(&config.shopify_credentials_path())
            .await?
            .overridden_by(ShopifySecret {
                access_token: env.access_token.clone(),
                client_id: env.client_id.clone(),
                client_secret: env.client_secret.clone(),
            });

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build the Shopify HTTP client")?;

        let access_token = match Credentials::resolve(secret)? {
            Credentials::AccessToken(token) => token,
            Credentials::ClientCredentials {
                client_id,
                client_secret,
            } => generate_token(&http, store, &client_id, &client_secret).await?,
        };

        Ok(Self {
            http,
            base_url: format!("https://{store}/admin/api/{API_VERSION}"),
            access_token,
            last_request: None,
        })
    }

    /// Follows `Link: rel="next"` until the last page and collects `key` from every page.
    async fn get_all<T: DeserializeOwned>(&mut self, path: &str, key: &str) -> Result<Vec<T>> {
        let mut url = Some(format!("{}{path}", self.base_url));
        let mut items = Vec::new();
        let mut pages = 0;
        while let Some(current) = url.take() {
            let response = self.get_with_retry(&current).await?;
            url = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);
            let mut body: Value = response
                .json()
                .await
                .with_context(|| format!("Failed to parse the {key} page from Shopify"))?;
            let page: Vec<T> = serde_json::from_value(body[key].take())
                .with_context(|| format!("Unexpected {key} data from Shopify"))?;
            pages += 1;
            debug!("Fetched page {pages} of {key} with {} items", page.len());
            items.extend(page);
        }
        info!("Fetched {} {key} from Shopify", items.len());
        Ok(items)
    }

    async fn rate_limit(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    /// 429 waits for `Retry-After`; server and transport errors back off exponentially.
    async fn get_with_retry(&mut self, url: &str) -> Result<reqwest::Response> {
        let mut retries = 0;
        loop {
            self.rate_limit().await;
            let result = self
                .http
                .get(url)
                .header("X-Shopify-Access-Token", &self.access_token)
                .send()
                .await;
            let wait = match result {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let wait = retry_after(response.headers());
                    warn!("Rate limited by Shopify, waiting {}s", wait.as_secs());
                    wait
                }
                Ok(response) if response.status().is_server_error() => {
                    warn!("Shopify returned {}, retrying", response.status());
                    backoff(retries)
                }
                Ok(response) if !response.status().is_success() => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    bail!("Shopify request failed with status {status}: {body}");
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    if retries + 1 >= MAX_RETRIES {
                        return Err(e).context("Shopify request failed");
                    }
                    warn!("Shopify request failed: {e}. Retrying");
                    backoff(retries + 1)
                }
            };
            retries += 1;
            if retries >= MAX_RETRIES {
                bail!("Shopify request to {url} failed after {MAX_RETRIES} attempts");
            }
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl Shop for ShopifyClient {
    async fn orders(&mut self) -> Result<Vec<ShopOrder>> {
        info!("Fetching orders from Shopify");
        self.get_all(&format!("/orders.json?limit={PAGE_LIMIT}&status=any"), "orders")
            .await
    }

    async fn products(&mut self) -> Result<Vec<ShopProduct>> {
        info!("Fetching products from Shopify");
        self.get_all(
            &format!("/products.json?limit={PAGE_LIMIT}&status=active"),
            "products",
        )
        .await
    }
}

/// The client-credentials grant.
async fn generate_token(
    http: &reqwest::Client,
    store: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<String> {
    debug!("Exchanging Shopify app credentials for an access token");
    let response = http
        .post(format!("https://{store}/admin/oauth/access_token"))
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await
        .context("Failed to request a Shopify access token")?;
    let status = response.status();
    if !status.is_success() {
        bail!("Shopify token request failed with status {status}");
    }
    let body: AccessTokenResponse = response
        .json()
        .await
        .context("Failed to parse the Shopify token response")?;
    body.access_token
        .filter(|t| !t.is_empty())
        .context("Shopify did not return an access token")
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt))
}

fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// The `rel="next"` URL of a `Link` header, if any.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|link| {
        let (url, params) = link.split_once(';')?;
        if !params.contains(r#"rel="next""#) {
            return None;
        }
        Some(
            url.trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string(),
        )
    })
}
