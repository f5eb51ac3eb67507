//! Common utilities shared by the loader, the runner and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ErrorCategory, Result};

/// Replace characters that are not legal in file names with `_`
///
/// Case display names double as report file stems, so they are kept legal.
pub fn legal_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\r' | '\n' | '\t' => '_',
            c => c,
        })
        .collect()
}
