//! Binary entrypoint for the conversation store admin tool.

use std::process::ExitCode;

use dialogue_store::start_dialogue_store;

/// Parse arguments, run one store command and print its JSON result.
fn main() -> ExitCode {
    start_dialogue_store::run()
}
