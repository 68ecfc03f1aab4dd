#![recursion_limit = "256"]

use anyhow::Result;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    emulator_smoke_e2e::cli::run().await
}
