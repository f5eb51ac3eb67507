//! CLI command definitions
//!
//! Defines the clap commands for the stepcase CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Load, compose and run testsets
    Run {
        /// Testset files or directories (directories are searched recursively)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Set a global variable: --var host=example.com (repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Write the JSON run report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the JSON trace records to this file
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Configuration file (default: platform config dir)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Mirror log output into this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },

    /// Load and compose testsets without running them
    Check {
        /// Testset files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Configuration file (default: platform config dir)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output the flattened cases as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the built-in verbs
    Functions {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
