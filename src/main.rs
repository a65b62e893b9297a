mod cashback;
mod config;
mod http;
mod ledger;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::parse();
    if let Err(err) = http::run(config).await {
        error!("{err}");
        std::process::exit(1);
    }
}
