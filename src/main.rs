use anyhow::Context;
use clap::Parser;
use shop_sheets_sync::args::{Args, Command, PslAction};
use shop_sheets_sync::commands::{self, Session};
use shop_sheets_sync::router::Router;
use shop_sheets_sync::{server, Config, InitOptions, Mode, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Recorded as `updated_by` for overrides set from the command line.
const CLI_ACTOR: &str = "cli";
const HTTP_ACTOR: &str = "http";

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().shopsync_home().path();

    // When SHOPSYNC_IN_TEST_MODE is set and non-empty, Google and Shopify are replaced by
    // in-memory doubles.
    let mode = Mode::from_env();

    let _: () = match args.command() {
        Command::Init(init_args) => {
            let opts = InitOptions {
                sheet_url: init_args.sheet_url(),
                store_url: init_args.store_url(),
                client_secret: init_args.client_secret(),
                shopify_credentials: init_args.shopify_credentials(),
            };
            commands::init(home, opts).await?.print()
        }

        Command::Auth(auth_args) => {
            let config = Config::load(home).await?;
            if auth_args.verify() {
                commands::auth_verify(&config).await?.print()
            } else {
                commands::auth(&config).await?.print()
            }
        }

        Command::Serve(serve_args) => {
            let config = Config::load(home).await?;
            let addr: SocketAddr = match serve_args.addr() {
                Some(addr) => addr,
                None => config
                    .listen_addr()
                    .parse()
                    .with_context(|| format!("Invalid listen_addr '{}'", config.listen_addr()))?,
            };
            let router = Router::new(Session::new(config, mode, HTTP_ACTOR));
            server::serve(router, addr).await?
        }

        Command::Run(run_args) => {
            let config = Config::load(home).await?;
            let mut router = Router::new(Session::new(config, mode, CLI_ACTOR));
            let response = router.handle(&run_args.text()).await;
            println!("{}", response.message);
            if !response.data.is_null() {
                debug!(
                    "Command output:\n\n{}\n\n",
                    serde_json::to_string_pretty(&response.data)?
                );
            }
            if !response.success {
                anyhow::bail!("The command did not succeed");
            }
        }

        Command::Sync => {
            let mut session = session(home, mode).await?;
            commands::sync(&mut session).await?.print()
        }

        Command::Psl(psl_args) => {
            let mut session = session(home, mode).await?;
            match psl_args.action() {
                PslAction::Backup => commands::backup_psl(&mut session).await?.print(),
                PslAction::Restore => commands::restore_psl(&mut session).await?.print(),
                PslAction::Migrate => commands::migrate_psl(&mut session).await?.print(),
            }
        }

        Command::Format => {
            let mut session = session(home, mode).await?;
            commands::format_sheet(&mut session).await?.print()
        }

        Command::Metrics => {
            let mut session = session(home, mode).await?;
            commands::recompute_metrics(&mut session).await?.print()
        }
    };
    Ok(())
}

async fn session(home: &Path, mode: Mode) -> Result<Session> {
    Ok(Session::new(Config::load(home).await?, mode, CLI_ACTOR))
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for the library and binary only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
