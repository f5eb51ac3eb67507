//! stepcase - declarative test-case engine
//!
//! Loads YAML/JSON testsets, composes api and suite fragments into flat case
//! lists and runs each case through its pre-command, steps, post-command and
//! verify phases.

use clap::Parser;
use commands::Commands;
use stepcase::{cli, commands};

#[derive(Parser)]
#[command(name = "stepcase", about = "Declarative test-case engine")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() {
    let cli = Cli::parse();

    match cli::dispatch(cli.command) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
