//! `shop-sheets-sync` copies Shopify orders into a Google sheet and runs keyword commands against
//! that sheet, either from the `shopsync` CLI or over HTTP.

mod api;
pub mod args;
mod backup;
pub mod commands;
mod config;
mod db;
mod error;
pub mod model;
pub mod router;
pub mod server;
mod utils;

#[cfg(test)]
mod test;

pub use api::Mode;
pub use config::{Config, InitOptions};
pub use error::Error;
pub use error::Result;
