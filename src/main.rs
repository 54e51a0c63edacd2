//! batchguard CLI: `run` one supervised batch, or `drive` a child that may ask to be restarted.

use batchguard::engine::arg_parser::{Cli, Commands};
use batchguard::engine::{handle_drive, handle_run};
use clap::Parser;
use std::time::Instant;

fn main() {
    let start_time = Instant::now();
    let cli = Cli::parse();
    let code = match &cli.command {
        Commands::Run(args) => handle_run(&cli, args),
        Commands::Drive(args) => handle_drive(&cli, args),
    };
    log::debug!("Total time: {:?}", start_time.elapsed());
    // Exits even while hung worker threads are still detached.
    std::process::exit(code);
}
