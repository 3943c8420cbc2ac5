//! Shared test utilities for creating test environments.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::commands::Session;
use crate::{Config, InitOptions, Mode};
use tempfile::TempDir;
use uuid::Uuid;

/// A temporary shopsync home with a config and database, pointed at a spreadsheet id and a store
/// nobody else uses, so every test gets its own in-memory sheet and shop.
/// Holds TempDir to keep the directory alive for the duration of the test.
pub(crate) struct TestEnv {
    _temp_dir: TempDir,
    config: Config,
}

impl TestEnv {
    pub(crate) async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("shopsync");
        let secret_path = temp_dir.path().join("client_secret.json");

        let secret_content = r#"{
            "installed": {
                "client_id": "test-client-id",
                "client_secret": "test-secret",
                "redirect_uris": ["http://localhost"],
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;
        std::fs::write(&secret_path, secret_content).unwrap();

        let rand = Uuid::new_v4().to_string().replace('-', "");
        let sheet_url = format!("https://docs.google.com/spreadsheets/d/{rand}/edit");
        let store_url = format!("{rand}.myshopify.com");
        let config = Config::create(
            &root,
            InitOptions {
                sheet_url: &sheet_url,
                store_url: &store_url,
                client_secret: &secret_path,
                shopify_credentials: None,
            },
        )
        .await
        .unwrap();

        Self {
            _temp_dir: temp_dir,
            config,
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn spreadsheet_id(&self) -> &str {
        self.config.spreadsheet_id()
    }

    pub(crate) fn store_url(&self) -> &str {
        self.config.store_url()
    }

    /// A session against the in-memory doubles, acting as `test`.
    pub(crate) fn session(&self) -> Session {
        Session::new(self.config.clone(), Mode::Testing, "test")
    }
}
