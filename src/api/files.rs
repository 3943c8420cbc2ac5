//! Serialization and deserialization structures for the credential files in `.secrets/`.
//! - `client_secret.json`: OAuth 2.0 client credentials from Google Cloud Console
//! - `token.json`: the Google access and refresh tokens we obtained
//! - `shopify.json`: a Shopify Admin API access token, or app credentials to obtain one

use crate::api::OAUTH_SCOPES;
use crate::{utils, Result};
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// This redirect needs to be present in the OAuth credential file, or else OAuth will not work.
const REDIRECT: &str = "http://localhost";

/// A JSON file held in memory between loads and saves.
#[derive(Default, Debug, Clone)]
pub(super) struct File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    path: PathBuf,
    data: F,
}

impl<F> File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    pub(super) async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data: F = utils::deserialize(&path).await?;
        Ok(Self { path, data })
    }

    pub(super) fn new(path: impl Into<PathBuf>, data: F) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Writes the data as pretty JSON, readable only by the owner.
    pub(super) async fn save(&self) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.data).context("Failed to serialize data to JSON")?;
        utils::write(&self.path, json).await?;

        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to set permissions on {}", self.path.display()))?;
        }

        Ok(())
    }

    pub(super) fn data(&self) -> &F {
        &self.data
    }

    pub(super) fn data_mut(&mut self) -> &mut F {
        &mut self.data
    }
}

/// Represents the structure of the `client_secret.json` file downloaded from Google Cloud Console.
///
/// This file contains OAuth 2.0 Desktop Application credentials. The standard format from Google
/// has an "installed" wrapper around the actual credentials.
///
/// Example:
/// ```json
/// {
///   "installed": {
///     "client_id": "YOUR_CLIENT_ID.apps.googleusercontent.com",
///     "client_secret": "YOUR_CLIENT_SECRET",
///     "redirect_uris": ["http://localhost"],
///     "auth_uri": "https://accounts.google.com/o/oauth2/auth",
///     "token_uri": "https://oauth2.googleapis.com/token"
///   }
/// }
/// ```
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(super) struct SecretFile {
    installed: InstalledCredentials,
}

impl SecretFile {
    pub(super) async fn load(path: &Path) -> Result<SecretFile> {
        utils::deserialize(path)
            .await
            .context("Unable to read the Google client secret file")
    }

    pub(super) fn client_id(&self) -> &str {
        &self.installed.client_id
    }

    pub(super) fn client_secret(&self) -> &str {
        &self.installed.client_secret
    }

    pub(super) fn auth_uri(&self) -> &str {
        &self.installed.auth_uri
    }

    pub(super) fn token_uri(&self) -> &str {
        &self.installed.token_uri
    }
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
    /// Must contain "http://localhost" (without a port number).
    redirect_uris: RedirectUris,
    auth_uri: String,
    token_uri: String,
}

#[derive(Default, Debug, Clone)]
struct RedirectUris(Vec<String>);

impl Serialize for RedirectUris {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RedirectUris {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let vec = Vec::<String>::deserialize(deserializer)?;
        if !vec.iter().any(|s| is_valid_redirect(s)) {
            return Err(D::Error::custom(format!(
                "At least one of the redirects needs to be {REDIRECT}, but this was not found. \
                When creating the redirect URI for your Google API Key, you must include \
                '{REDIRECT}'"
            )));
        }
        Ok(RedirectUris(vec))
    }
}

fn is_valid_redirect(s: &str) -> bool {
    s == REDIRECT || s == "http://127.0.0.1"
}

/// The Google tokens we obtained, in our own shape rather than Google's.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(super) struct TokenFile {
    scopes: Vec<String>,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    id_token: Option<String>,
}

impl TokenFile {
    pub(super) async fn load(p: impl AsRef<Path>) -> Result<File<Self>> {
        let file: File<Self> = File::load(p.as_ref())
            .await
            .context("Unable to deserialize the token JSON file. Run 'shopsync auth' first")?;
        file.data().validate_scopes()?;
        Ok(file)
    }

    fn validate_scopes(&self) -> Result<()> {
        let found_scopes: HashSet<&str> = self.scopes.iter().map(|s| s.as_str()).collect();
        for &required_scope in OAUTH_SCOPES {
            if !found_scopes.contains(required_scope) {
                bail!("OAuth scope '{required_scope}' is missing. Run 'shopsync auth' again");
            }
        }
        Ok(())
    }

    pub(super) fn new(
        scopes: Vec<String>,
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            scopes,
            access_token,
            refresh_token,
            expires_at,
            id_token: None,
        }
    }

    pub(super) fn access_token(&self) -> &str {
        &self.access_token
    }

    pub(super) fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub(super) fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True if the token is expired or will expire within 5 minutes.
    pub(super) fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now() + chrono::Duration::minutes(5)
    }

    /// Google only sends a new refresh token sometimes, so the old one is kept when `None`.
    pub(super) fn update(
        &mut self,
        access_token: String,
        expires_at: DateTime<Utc>,
        refresh_token: Option<String>,
    ) {
        self.access_token = access_token;
        self.expires_at = expires_at;
        if let Some(rt) = refresh_token {
            self.refresh_token = rt;
        }
    }
}

/// The contents of `shopify.json`. Either a ready `access_token`, or the app's `client_id` and
/// `client_secret` for the client-credentials grant.
///
/// ```json
/// { "access_token": "shpat_..." }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct ShopifySecret {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) client_secret: Option<String>,
}

impl ShopifySecret {
    /// Loads the file if it exists. A missing file is not an error since the environment may
    /// carry the credentials instead.
    pub(super) async fn load_if_exists(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        utils::deserialize(path)
            .await
            .context("Unable to read the Shopify credentials file")
    }

    /// Fields set in `other` replace ours.
    pub(super) fn overridden_by(self, other: ShopifySecret) -> Self {
        Self {
            access_token: other.access_token.or(self.access_token),
            client_id: other.client_id.or(self.client_id),
            client_secret: other.client_secret.or(self.client_secret),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_json(dir: &TempDir, json: &str) -> PathBuf {
        let p = dir.path().join("file.json");
        utils::write(&p, json).await.unwrap();
        p
    }

    fn secret_json(redirect: &str) -> String {
        format!(
            r#"{{
    "installed": {{
        "client_id": "YOUR_CLIENT_ID.apps.googleusercontent.com",
        "client_secret": "YOUR_CLIENT_SECRET",
        "redirect_uris": ["{redirect}", "https://example.com:4040/whatever"],
        "auth_uri": "https://accounts.google.com/o/oauth2/auth",
        "token_uri": "https://oauth2.googleapis.com/token"
    }}
}}"#
        )
    }

    #[tokio::test]
    async fn test_client_secret_good_redirects() {
        let dir = TempDir::new().unwrap();
        for redirect in ["http://localhost", "http://127.0.0.1"] {
            let p = write_json(&dir, &secret_json(redirect)).await;
            let secret = SecretFile::load(&p).await.unwrap();
            assert_eq!(secret.client_id(), "YOUR_CLIENT_ID.apps.googleusercontent.com");
            assert_eq!(secret.token_uri(), "https://oauth2.googleapis.com/token");
        }
    }

    #[tokio::test]
    async fn test_client_secret_bad_redirect() {
        let dir = TempDir::new().unwrap();
        let p = write_json(&dir, &secret_json("http://localhost:9900")).await;
        let err = SecretFile::load(&p).await.unwrap_err();
        assert!(format!("{err:?}")
            .contains("At least one of the redirects needs to be http://localhost"));
    }

    #[tokio::test]
    async fn test_token_file_missing_scope() {
        let dir = TempDir::new().unwrap();
        let p = write_json(
            &dir,
            r#"{
                "scopes": ["https://www.googleapis.com/auth/drive.readonly"],
                "access_token": "abc12",
                "refresh_token": "xyz89",
                "expires_at": "2025-01-01T00:00:00Z",
                "id_token": null
            }"#,
        )
        .await;
        let err = TokenFile::load(&p).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("https://www.googleapis.com/auth/spreadsheets"));
    }

    #[tokio::test]
    async fn test_token_file_save_update_load() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("token.json");
        let token = TokenFile::new(
            OAUTH_SCOPES.iter().map(|s| s.to_string()).collect(),
            "abc12".into(),
            "xyz89".into(),
            "2025-01-01T00:00:00Z".parse().unwrap(),
        );
        assert!(token.is_expired());
        let mut file = File::new(&p, token);
        file.save().await.unwrap();

        let mut loaded = TokenFile::load(&p).await.unwrap();
        assert_eq!(loaded.data().access_token(), "abc12");
        let later = Utc::now() + chrono::Duration::hours(1);
        loaded.data_mut().update("new".into(), later, None);
        assert!(!loaded.data().is_expired());
        assert_eq!(loaded.data().refresh_token(), "xyz89");
        loaded.save().await.unwrap();

        file = TokenFile::load(&p).await.unwrap();
        assert_eq!(file.data().access_token(), "new");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&p).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_shopify_secret() {
        let dir = TempDir::new().unwrap();
        let missing = ShopifySecret::load_if_exists(&dir.path().join("nope.json"))
            .await
            .unwrap();
        assert_eq!(missing, ShopifySecret::default());

        let p = write_json(&dir, r#"{"client_id": "id", "client_secret": "secret"}"#).await;
        let file = ShopifySecret::load_if_exists(&p).await.unwrap();
        let merged = file.overridden_by(ShopifySecret {
            access_token: Some("shpat_env".into()),
            client_id: None,
            client_secret: Some("env_secret".into()),
        });
        assert_eq!(merged.access_token.as_deref(), Some("shpat_env"));
        assert_eq!(merged.client_id.as_deref(), Some("id"));
        assert_eq!(merged.client_secret.as_deref(), Some("env_secret"));
    }
}
