mod cosmos;
mod mongo;
mod service_bus;
mod storage;

use emulator_smoke_clients::{ConfigOverrides, EmulatorConfig};
use emulator_smoke_e2e::scenarios::ScenarioOutcome;

/// Configuration from the environment and default config file
pub fn config() -> EmulatorConfig {
    emulator_smoke_e2e::init_tracing();
    EmulatorConfig::load(None, &ConfigOverrides::default()).expect("Failed to load config")
}

/// Fail on any failed scenario; skipped ones only print
pub fn assert_passed_or_skipped(outcomes: &[ScenarioOutcome]) {
    assert!(!outcomes.is_empty(), "group ran no scenarios");
    for outcome in outcomes {
        eprintln!("{}", outcome);
        if let ScenarioOutcome::Failed { error, .. } = outcome {
            panic!("{} failed: {}", outcome.scenario(), error);
        }
        if let ScenarioOutcome::Passed { cleanup, .. } = outcome {
            assert!(cleanup.is_clean(), "teardown incomplete: {}", cleanup);
        }
    }
}
