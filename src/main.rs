//! Binary entrypoint that launches the relay agent.

use std::process::ExitCode;

use nabi_agent::start_nabi_agent;

/// Start the agent: HTTP server plus the crawl scheduler.
fn main() -> ExitCode {
    start_nabi_agent::run()
}
