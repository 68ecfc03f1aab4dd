//! Smoke tests for the local Azure emulators
//!
//! Runs CRUD and send/receive scenarios against the Cosmos DB emulator
//! (native and MongoDB APIs), Azurite (blob, queue, table) and the Service
//! Bus emulator. A group whose emulator is not reachable is skipped with
//! container diagnostics rather than failed.

#![recursion_limit = "256"]

pub mod cleanup;
pub mod cli;
pub mod container;
pub mod diagnostics;
pub mod fixtures;
pub mod naming;
pub mod scenarios;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,emulator_smoke=debug";

/// Initialize console tracing with [`DEFAULT_FILTER`]
pub fn init_tracing() {
    init_tracing_with(DEFAULT_FILTER);
}

/// Initialize console tracing on stderr
///
/// `RUST_LOG` wins over `default_filter`. Calling this again after a
/// subscriber is installed does nothing, so tests may call it freely.
pub fn init_tracing_with(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Get the Docker image to use for Azurite
pub fn azurite_image() -> String {
    std::env::var("EMULATOR_SMOKE_AZURITE_IMAGE")
        .unwrap_or_else(|_| "mcr.microsoft.com/azure-storage/azurite:latest".to_string())
}
