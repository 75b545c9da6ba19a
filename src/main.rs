#![forbid(unsafe_code)]

//! cleanmaster — disk-hygiene CLI entry point.

use clap::Parser;

fn main() {
    let args = cleanmaster::cli_app::Cli::parse();
    if let Err(e) = cleanmaster::cli_app::run(&args) {
        eprintln!("cleanmaster: {e}");
        std::process::exit(1);
    }
}
