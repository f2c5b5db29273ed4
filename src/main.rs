//! gradmin CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`, which prints the
//! JSON response. Failures are repeated on stderr and exit non-zero.

use gradmin::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
