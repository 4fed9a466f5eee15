//! acolite-gee CLI entrypoint.
//!
//! Provides a thin wrapper over the `cli` module: parse args, search the
//! catalog, correct and export, and exit with appropriate status.
//! For programmatic use, prefer the library API (`acolite_gee::api`).

use clap::Parser;

mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();
    cli::run(args)
}
