//! Logging and tracing configuration
//!
//! Console logging goes to stderr so that stdout stays reserved for the
//! case verdicts. A run log file can be mirrored on request.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("stepcase=debug,warn")
        } else {
            EnvFilter::new("stepcase=info,warn")
        }
    })
}

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG when verbose), WARN for dependencies.
pub fn init_cli(verbose: bool) {
    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing with an additional run log file
///
/// Falls back to stderr-only logging when the file cannot be opened.
pub fn init_with_file(verbose: bool, log_file: &Path) {
    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
    {
        Ok(file) => {
            let file_layer = fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true);

            let stderr_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact();

            tracing_subscriber::registry()
                .with(default_filter(verbose))
                .with(file_layer)
                .with(stderr_layer)
                .init();
        }
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            init_cli(verbose);
        }
    }
}
