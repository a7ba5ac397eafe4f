//! Entry point for the `dbgbridged` daemon.

use std::process::ExitCode;

#[expect(
    clippy::print_stderr,
    reason = "launch failures may happen before telemetry is installed"
)]
fn main() -> ExitCode {
    match dbgbridged::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("dbgbridged: {error}");
            ExitCode::FAILURE
        }
    }
}
