//! Google OAuth 2.0 for the Sheets API.
//!
//! - `run_consent_flow`: opens the consent page, receives the redirect on a one-shot local server
//!   at `http://localhost:3030`, exchanges the code (with PKCE) and saves `token.json`.
//! - `TokenProvider`: hands out the saved access token, refreshing and re-saving it when it is
//!   about to expire.

use crate::api::files::{File, SecretFile, TokenFile};
use crate::api::OAUTH_SCOPES;
use crate::Result;
use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const OAUTH_CALLBACK_PORT: u16 = 3030;
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

fn redirect_uri() -> String {
    format!("http://localhost:{OAUTH_CALLBACK_PORT}")
}

fn oauth_client(secret: &SecretFile) -> Result<GoogleClient> {
    Ok(BasicClient::new(ClientId::new(secret.client_id().to_string()))
        .set_client_secret(ClientSecret::new(secret.client_secret().to_string()))
        .set_auth_uri(AuthUrl::new(secret.auth_uri().to_string()).context("Invalid auth_uri")?)
        .set_token_uri(TokenUrl::new(secret.token_uri().to_string()).context("Invalid token_uri")?)
        .set_redirect_uri(RedirectUrl::new(redirect_uri()).context("Invalid redirect URI")?))
}

/// The token endpoint must not be followed through redirects.
fn http_client() -> Result<oauth2::reqwest::Client> {
    oauth2::reqwest::ClientBuilder::new()
        .redirect(oauth2::reqwest::redirect::Policy::none())
        .build()
        .context("Failed to build the OAuth HTTP client")
}

fn expires_at(response: &BasicTokenResponse) -> chrono::DateTime<Utc> {
    let lifetime = response
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .unwrap_or_else(|| chrono::Duration::hours(1));
    Utc::now() + lifetime
}

/// Runs the browser consent flow and writes `token_path`.
pub(crate) async fn run_consent_flow(secret_path: &Path, token_path: &Path) -> Result<()> {
    info!("Starting OAuth consent flow");
    let secret = SecretFile::load(secret_path).await?;
    let client = oauth_client(&secret)?;

    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(OAUTH_SCOPES.iter().map(|s| Scope::new(s.to_string())))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(challenge)
        .url();

    let listener = TcpListener::bind(("127.0.0.1", OAUTH_CALLBACK_PORT))
        .await
        .with_context(|| format!("Unable to listen on port {OAUTH_CALLBACK_PORT}"))?;
    println!("Open this URL in your browser to authorize access to Google Sheets:\n\n{auth_url}\n");
    info!("Waiting for the OAuth callback on {}", redirect_uri());

    let params = wait_for_callback(listener).await?;
    let code = params.authorization_code(csrf.secret())?;

    let http = http_client()?;
    let response = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(verifier)
        .request_async(&http)
        .await
        .map_err(|e| anyhow!("Failed to exchange the authorization code: {e}"))?;

    let refresh_token = response
        .refresh_token()
        .map(|t| t.secret().to_string())
        .context("Google did not return a refresh token")?;
    let scopes = match response.scopes() {
        Some(scopes) => scopes.iter().map(|s| s.to_string()).collect(),
        None => OAUTH_SCOPES.iter().map(|s| s.to_string()).collect(),
    };
    let token = TokenFile::new(
        scopes,
        response.access_token().secret().to_string(),
        refresh_token,
        expires_at(&response),
    );
    File::new(token_path, token).save().await?;
    info!("Tokens saved to {}", token_path.display());
    Ok(())
}

/// The query parameters Google sends to the redirect URI.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl CallbackParams {
    fn parse(query: Option<&str>) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }

    fn is_callback(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }

    /// Checks the CSRF state and returns the code.
    fn authorization_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            bail!("Authorization was denied: {error}");
        }
        if self.state.as_deref() != Some(expected_state) {
            bail!("The OAuth state did not match; the callback may not be from this request");
        }
        self.code.context("The OAuth callback did not include a code")
    }
}

/// Serves `listener` until a request carrying `code` or `error` arrives. Other requests (such as
/// the browser asking for a favicon) get a 404.
async fn wait_for_callback(listener: TcpListener) -> Result<CallbackParams> {
    let (tx, mut rx) = mpsc::channel::<CallbackParams>(1);
    let server = tokio::spawn(async move {
        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Failed to accept the OAuth callback connection: {e}");
                    continue;
                }
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let tx = tx.clone();
                    async move { Ok::<_, Infallible>(callback_response(req, tx).await) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("OAuth callback connection ended with an error: {e}");
                }
            });
        }
    });

    let received = tokio::time::timeout(CALLBACK_TIMEOUT, rx.recv()).await;
    server.abort();
    received
        .context("Timed out waiting for the OAuth callback")?
        .context("The OAuth callback server stopped")
}

async fn callback_response(
    req: Request<Incoming>,
    tx: mpsc::Sender<CallbackParams>,
) -> Response<Full<Bytes>> {
    let params = CallbackParams::parse(req.uri().query());
    if !params.is_callback() {
        return text_response(StatusCode::NOT_FOUND, "Not found");
    }
    if tx.send(params).await.is_err() {
        debug!("OAuth callback arrived after the flow finished");
    }
    text_response(
        StatusCode::OK,
        "Authorization received. You can close this window and return to the terminal.",
    )
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Supplies access tokens from `token.json`, refreshing it when needed.
pub(crate) struct TokenProvider {
    secret: SecretFile,
    token: File<TokenFile>,
}

impl TokenProvider {
    pub(crate) async fn load(
        secret_path: impl AsRef<Path>,
        token_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let secret = SecretFile::load(secret_path.as_ref()).await?;
        let token = TokenFile::load(token_path.as_ref()).await?;
        Ok(Self { secret, token })
    }

    /// The current access token, which may be expired.
    pub(crate) fn token(&self) -> &str {
        self.token.data().access_token()
    }

    /// Returns a usable access token, refreshing and saving it first if it is about to expire.
    pub(crate) async fn token_with_refresh(&mut self) -> Result<String> {
        if !self.token.data().is_expired() {
            return Ok(self.token().to_string());
        }
        debug!(
            "Access token expires at {}, refreshing",
            self.token.data().expires_at()
        );
        let client = oauth_client(&self.secret)?;
        let http = http_client()?;
        let refresh_token = RefreshToken::new(self.token.data().refresh_token().to_string());
        let response = client
            .exchange_refresh_token(&refresh_token)
            .request_async(&http)
            .await
            .map_err(|e| {
                anyhow!("Failed to refresh the Google access token: {e}. Run 'shopsync auth' again")
            })?;

        let expires_at = expires_at(&response);
        self.token.data_mut().update(
            response.access_token().secret().to_string(),
            expires_at,
            response.refresh_token().map(|t| t.secret().to_string()),
        );
        self.token.save().await?;
        info!("Refreshed the Google access token");
        Ok(self.token().to_string())
    }
}
