use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use liverec::config::Config;

mod log;
mod utils;

#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cfg: Config = utils::load("livenvr".to_string(), args.config);
    log::set(
        format!("livenvr={0},liverec={0},storage={0}", cfg.log.level),
        cfg.log.format,
    );
    if let Err(e) = cfg.validate() {
        error!("invalid config: {:?}", e);
        return Err(e);
    }

    let listener = TcpListener::bind(cfg.http.listen).await?;
    info!(
        "livenvr {} with {} configured cameras",
        env!("CARGO_PKG_VERSION"),
        cfg.cameras.len()
    );
    liverec::serve(cfg, listener, utils::shutdown_signal()).await
}
