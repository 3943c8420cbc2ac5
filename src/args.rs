//! These structs provide the CLI interface for `shopsync`.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// shopsync: Copy Shopify orders into a Google sheet and manage the sheet with keyword commands.
///
/// Orders are fetched from the Shopify Admin API and written to the Orders tab of your Google
/// sheet, one row per line item. The hand-entered PSL column is backed up before each sync and
/// restored afterwards, and per-order label costs, PSL values and notes are kept in a local
/// database so they survive every sync.
///
/// The same commands can be typed as plain words with `shopsync run`, or sent over HTTP to
/// `shopsync serve` (this is what the Apps Script dialog in the sheet does).
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and initialize the configuration files.
    ///
    /// This is the first command you should run. You need:
    ///
    /// - The URL of the Google sheet that receives the orders (--sheet-url).
    ///
    /// - Your store's domain, e.g. my-shop.myshopify.com (--store-url).
    ///
    /// - A Google OAuth client secret for a desktop app, downloaded from the Google Cloud console
    ///   (--client-secret).
    ///
    /// - Optionally, a JSON file with Shopify credentials: either `access_token`, or `client_id`
    ///   and `client_secret` (--shopify-credentials). These can also come from the environment.
    Init(InitArgs),
    /// Authenticate with Google Sheets via OAuth.
    Auth(AuthArgs),
    /// Serve the command router over HTTP.
    Serve(ServeArgs),
    /// Run a plain-words command, e.g. `shopsync run set label cost for order 1042 to 4.85`.
    Run(RunArgs),
    /// Fetch every order from Shopify and overwrite the Orders tab, preserving the PSL column.
    Sync,
    /// Back up, restore or migrate the PSL column.
    Psl(PslArgs),
    /// Style the Orders tab and brand the other tabs.
    Format,
    /// Recompute the METRICS tab.
    Metrics,
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where shopsync data and configuration is held. Defaults to ~/shopsync
    #[arg(long, env = "SHOPSYNC_HOME", default_value_t = default_shopsync_home())]
    shopsync_home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, shopsync_home: PathBuf) -> Self {
        Self {
            log_level,
            shopsync_home: shopsync_home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn shopsync_home(&self) -> &DisplayPath {
        &self.shopsync_home
    }
}

/// (Not shown): Args for the `shopsync init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The URL to your Google sheet. It looks like this:
    /// https://docs.google.com/spreadsheets/d/1a7Km9FxQwRbPt82JvN4LzYpH5OcGnWsT6iDuE3VhMjX
    #[arg(long)]
    sheet_url: String,

    /// Your store's domain, e.g. my-shop.myshopify.com
    #[arg(long)]
    store_url: String,

    /// The path to your downloaded OAuth client secret. This file will be copied to the secrets
    /// directory in the main data directory.
    #[arg(long)]
    client_secret: PathBuf,

    /// The path to a JSON file with Shopify credentials. Copied to the secrets directory.
    #[arg(long)]
    shopify_credentials: Option<PathBuf>,
}

impl InitArgs {
    pub fn new(
        sheet_url: impl Into<String>,
        store_url: impl Into<String>,
        client_secret: impl Into<PathBuf>,
        shopify_credentials: Option<PathBuf>,
    ) -> Self {
        Self {
            sheet_url: sheet_url.into(),
            store_url: store_url.into(),
            client_secret: client_secret.into(),
            shopify_credentials,
        }
    }

    pub fn sheet_url(&self) -> &str {
        &self.sheet_url
    }

    pub fn store_url(&self) -> &str {
        &self.store_url
    }

    pub fn client_secret(&self) -> &Path {
        &self.client_secret
    }

    pub fn shopify_credentials(&self) -> Option<&Path> {
        self.shopify_credentials.as_deref()
    }
}

/// (Not shown): Args for the `shopsync auth` command.
#[derive(Debug, Parser, Clone)]
pub struct AuthArgs {
    /// Verify and refresh authentication.
    #[arg(long)]
    verify: bool,
}

impl AuthArgs {
    pub fn new(verify: bool) -> Self {
        Self { verify }
    }

    pub fn verify(&self) -> bool {
        self.verify
    }
}

/// (Not shown): Args for the `shopsync serve` command.
#[derive(Debug, Parser, Clone)]
pub struct ServeArgs {
    /// The address to listen on. Defaults to `listen_addr` from config.json.
    #[arg(long)]
    addr: Option<SocketAddr>,
}

impl ServeArgs {
    pub fn new(addr: Option<SocketAddr>) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }
}

/// (Not shown): Args for the `shopsync run` command.
#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// The command, as you would type it in the sheet's dialog.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    words: Vec<String>,
}

impl RunArgs {
    pub fn new(words: Vec<String>) -> Self {
        Self { words }
    }

    /// The words joined with single spaces.
    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PslAction {
    #[default]
    Backup,
    Restore,
    Migrate,
}

serde_plain::derive_display_from_serialize!(PslAction);
serde_plain::derive_fromstr_from_deserialize!(PslAction);

/// (Not shown): Args for the `shopsync psl` command.
#[derive(Debug, Parser, Clone)]
pub struct PslArgs {
    /// One of "backup", "restore" or "migrate"
    action: PslAction,
}

impl PslArgs {
    pub fn new(action: PslAction) -> Self {
        Self { action }
    }

    pub fn action(&self) -> PslAction {
        self.action
    }
}

fn default_shopsync_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("shopsync"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --shopsync-home or SHOPSYNC_HOME instead of relying on the \
                default home directory. If you continue using the program right now, you may \
                have problems!",
            );
            PathBuf::from("shopsync")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = Args::parse_from([
            "shopsync",
            "--shopsync-home",
            "/tmp/shop",
            "run",
            "set",
            "label",
            "cost",
            "for",
            "order",
            "1042",
            "to",
            "4.85",
        ]);
        assert_eq!(args.common().shopsync_home().path(), Path::new("/tmp/shop"));
        match args.command() {
            Command::Run(run) => assert_eq!(run.text(), "set label cost for order 1042 to 4.85"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_psl_and_serve() {
        let args = Args::parse_from(["shopsync", "--log-level", "debug", "psl", "migrate"]);
        assert_eq!(args.common().log_level(), LevelFilter::DEBUG);
        match args.command() {
            Command::Psl(psl) => assert_eq!(psl.action(), PslAction::Migrate),
            other => panic!("unexpected command {other:?}"),
        }

        let args = Args::parse_from(["shopsync", "serve", "--addr", "0.0.0.0:9000"]);
        match args.command() {
            Command::Serve(serve) => {
                assert_eq!(serve.addr(), Some("0.0.0.0:9000".parse().unwrap()))
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
