use crate::commands::Out;
use crate::{Config, InitOptions, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the home directory, its subdirectories and:
/// - Creates an initial `config.json` holding the sheet URL, the store and default settings
/// - Copies the Google client secret (and the Shopify credentials, if given) into `.secrets/`
/// - Creates the SQLite database
///
/// # Errors
/// - Returns an error if the home directory already holds a config, or any file operation fails.
pub async fn init(home: &Path, opts: InitOptions<'_>) -> Result<Out<()>> {
    let config = Config::create(home, opts)
        .await
        .context("Unable to create the data directory and configs")?;
    Ok(format!(
        "Successfully created the shopsync directory at {}. Run 'shopsync auth' next",
        config.root().display()
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init() {
        let dir = TempDir::new().unwrap();
        let secret = dir.path().join("client_secret.json");
        utils::write(&secret, "{}").await.unwrap();
        let home = dir.path().join("shopsync");
        let opts = InitOptions {
            sheet_url: "https://docs.google.com/spreadsheets/d/abc123/edit",
            store_url: "demo.myshopify.com",
            client_secret: &secret,
            shopify_credentials: None,
        };
        let out = init(&home, opts).await.unwrap();
        assert!(out.message().starts_with("Successfully created"));
        assert!(home.join("config.json").is_file());

        assert!(init(&home, opts).await.is_err());
    }
}
