mod api;
mod cancel;
mod cli;
mod export;
mod livelog;
mod model;
mod orchestrator;
mod poller;
mod selection;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = args.list || args.json || args.text;
    cli::init_logging(&args, !is_non_tui && cfg!(feature = "tui"));

    let res = cli::run(args).await;
    if res.is_ok() && is_non_tui {
        // Explicitly exit with code 0 on success, especially for scripted modes
        std::process::exit(0);
    }
    res
}
