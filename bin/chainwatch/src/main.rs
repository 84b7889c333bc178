//! The chainwatch daemon.

pub mod cli;
pub mod consumers;
pub mod flags;

use clap::Parser;

fn main() {
    if let Err(err) = cli::Cli::parse().run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
