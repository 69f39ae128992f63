//! Server binary for deployments that name the binary explicitly.
//! Run with: cargo run --bin nabi-server

use std::process::ExitCode;

use nabi_agent::start_nabi_agent;

fn main() -> ExitCode {
    start_nabi_agent::run()
}
