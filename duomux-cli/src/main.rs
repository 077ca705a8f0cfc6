mod cli;
mod commands;
mod error;
mod logging;
mod output;

use std::process;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    error::Result,
    logging::init_logging,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let _guard = init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            on_interrupt.cancel();
        }
    });

    let executor = CommandExecutor::new(&args, cancel);
    match &args.command {
        Commands::Mux(mux) => executor.mux(mux).await,
        Commands::Single(single) => executor.single(single).await,
    }
}
