//! Authentication command handlers for the Google OAuth flow.
//!
//! - `shopsync auth` runs the consent flow in the browser
//! - `shopsync auth --verify` checks the saved token and refreshes it if needed

use crate::api::{run_consent_flow, TokenProvider};
use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;

/// Runs the OAuth consent flow and saves `token.json`. This is the only command that asks the user
/// to open a browser.
pub async fn auth(config: &Config) -> Result<Out<()>> {
    run_consent_flow(&config.client_secret_path(), &config.token_path()).await?;
    Ok(format!(
        "Authorization complete. Tokens saved to {}",
        config.token_path().display()
    )
    .into())
}

/// Verifies the saved token, refreshing it when it is about to expire. Never opens a browser.
pub async fn auth_verify(config: &Config) -> Result<Out<()>> {
    let mut token_provider = TokenProvider::load(config.client_secret_path(), config.token_path())
        .await
        .context(
            "Unable to use the existing tokens found in the token JSON file. \n\n\
            You should run 'shopsync auth' (without the --verify flag).",
        )?;
    token_provider
        .token_with_refresh()
        .await
        .context("Unable to refresh the token")?;
    Ok("Your OAuth token is valid!".into())
}
