//! CLI command handling
//!
//! Dispatches CLI commands and formats console output. Verdicts go to
//! stdout; logs go to stderr.

use colored::Colorize;
use std::path::Path;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::logging;
use crate::common::Result;
use crate::context::builtins;
use crate::definition::{load_paths, TestSet};
use crate::runner::report::write_json;
use crate::runner::{CaseResult, CaseStatus, RunReport, Runner};

/// Dispatch a CLI command
///
/// Returns `false` when the command ran but the run did not pass.
pub fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            paths,
            vars,
            report,
            trace,
            config,
            log_file,
            verbose,
        } => {
            let mut config = load_config(config.as_deref())?;
            config.apply_overrides(&vars)?;

            match log_file.as_ref().or(config.output.log_file.as_ref()) {
                Some(path) => logging::init_with_file(verbose, path),
                None => logging::init_cli(verbose),
            }

            let testsets = load_paths(&paths, &config.loader)?;
            let mut runner = Runner::from_config(&config);
            let run_report = runner.run_testsets(&testsets);

            print_run(&testsets, &run_report, verbose);

            if let Some(path) = report.or(config.output.report) {
                run_report.write_to(&path)?;
                println!("Report written to {}", path.display());
            }
            if let Some(path) = trace.or(config.output.trace) {
                write_json(&path, runner.tracer().records())?;
                println!("Trace written to {}", path.display());
            }

            Ok(run_report.passed())
        }

        Commands::Check {
            paths,
            config,
            json,
        } => {
            logging::init_cli(false);
            let config = load_config(config.as_deref())?;
            let testsets = load_paths(&paths, &config.loader)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&testsets)?);
            } else {
                print_testsets(&testsets);
            }
            Ok(true)
        }

        Commands::Functions { json } => {
            logging::init_cli(false);
            let verbs = builtins::all_builtins();

            if json {
                let list: Vec<_> = verbs
                    .iter()
                    .map(|b| {
                        serde_json::json!({
                            "name": b.name,
                            "signature": b.signature.to_string(),
                            "arity": b.signature.arity(),
                            "description": b.description,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                println!("Built-in verbs:");
                for b in verbs {
                    println!(
                        "  {:14} {:28} {}",
                        b.name,
                        b.signature.to_string(),
                        b.description.dimmed()
                    );
                }
            }
            Ok(true)
        }
    }
}

/// Explicit config file, or the default one when present
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn print_run(testsets: &[TestSet], report: &RunReport, verbose: bool) {
    let mut results = report.cases.iter();

    for testset in testsets {
        println!(
            "\n{} {} {}",
            "Testset:".blue().bold(),
            testset.project.name.white().bold(),
            format!("[{}]", testset.project.module).dimmed()
        );

        for result in results.by_ref().take(testset.cases.len()) {
            print_case(result, verbose);
        }
    }

    let summary = &report.summary;
    let line = format!(
        "{} case(s): {} passed, {} failed, {} error(s)",
        summary.total, summary.passed, summary.failed, summary.errors
    );
    if report.passed() {
        println!("\n{} {}\n", "✓".green().bold(), line.green().bold());
    } else {
        println!("\n{} {}\n", "✗".red().bold(), line.red().bold());
    }
}

fn print_case(result: &CaseResult, verbose: bool) {
    match result.status {
        CaseStatus::Passed => {
            println!("  {} {}", "✓".green(), result.name);
            if verbose {
                for verify in &result.verifies {
                    println!("      {} {}", "✓".green(), verify.action.dimmed());
                }
            }
        }
        CaseStatus::Failed => {
            println!("  {} {}", "✗".red(), result.name);
            for verify in result.failed_verifies() {
                println!(
                    "      {} {}: {}",
                    "✗".red(),
                    verify.action,
                    verify.message.as_deref().unwrap_or("failed")
                );
            }
        }
        CaseStatus::Error => {
            println!("  {} {}", "✗".red().bold(), result.name);
            if let Some(error) = &result.error {
                println!(
                    "      {} in {}: {}",
                    error.kind.red(),
                    error.phase,
                    error.message
                );
            }
        }
    }
}

fn print_testsets(testsets: &[TestSet]) {
    let mut total = 0;
    for testset in testsets {
        println!(
            "{} {} {}",
            "Testset:".blue().bold(),
            testset.project.name.white().bold(),
            display_path(&testset.path).dimmed()
        );
        for case in &testset.cases {
            println!(
                "  {} {:32} {} step(s), {} verify",
                "•".cyan(),
                case.name(),
                case.steps.len(),
                case.verify.len()
            );
        }
        total += testset.cases.len();
    }
    println!(
        "\n{} {} testset(s), {} case(s)",
        "✓".green().bold(),
        testsets.len(),
        total
    );
}

fn display_path(path: &Path) -> String {
    format!("({})", path.display())
}
