//! `emulator-smoke` command line
//!
//! Configuration is loaded from CLI args, environment variables, or config
//! file with the usual precedence (CLI > env > file).

use crate::diagnostics;
use crate::fixtures::group_probes;
use crate::scenarios::{run_group, Group, ScenarioOutcome};
use anyhow::Result;
use clap::{Parser, Subcommand};
use emulator_smoke_clients::{ConfigOverrides, EmulatorConfig};
use std::path::PathBuf;
use std::process::ExitCode;

pub const EXIT_SUCCESS: u8 = 0;
/// A scenario or probe failed
pub const EXIT_FAILED: u8 = 1;
/// Bad arguments or configuration
pub const EXIT_USAGE: u8 = 2;
/// Nothing failed but something was skipped under `--require-all`
pub const EXIT_SKIPPED: u8 = 4;

#[derive(Parser)]
#[command(name = "emulator-smoke")]
#[command(about = "Smoke tests for the local Azure emulators", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Cosmos DB emulator endpoint
    #[arg(long, global = true)]
    pub cosmos_endpoint: Option<String>,

    /// MongoDB API connection URI
    #[arg(long, global = true)]
    pub mongo_uri: Option<String>,

    /// Azurite connection string
    #[arg(long, global = true)]
    pub storage_connection_string: Option<String>,

    /// Service Bus emulator connection string
    #[arg(long = "servicebus-connection-string", global = true)]
    pub service_bus_connection_string: Option<String>,

    /// Service Bus queue declared in the emulator config (default: queue.1)
    #[arg(long = "servicebus-queue", global = true)]
    pub service_bus_queue: Option<String>,

    /// Seconds to wait for a Service Bus message
    #[arg(long = "receive-wait", global = true)]
    pub receive_wait_secs: Option<u64>,

    /// Container runtime binary used for diagnostics
    #[arg(long, global = true)]
    pub container_runtime: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check which emulators answer
    Probe {
        /// Emulator group (can be specified multiple times; default all)
        #[arg(long = "group", value_enum)]
        groups: Vec<Group>,
    },
    /// Show container and port diagnostics
    Diagnose {
        /// Emulator group (can be specified multiple times; default all)
        #[arg(long = "group", value_enum)]
        groups: Vec<Group>,
    },
    /// Run smoke scenarios
    Run {
        /// Emulator group (can be specified multiple times; default all)
        #[arg(long = "group", value_enum)]
        groups: Vec<Group>,
        /// Treat skipped scenarios as a failure
        #[arg(long)]
        require_all: bool,
    },
    /// Show effective configuration
    Config,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            cosmos_endpoint: self.cosmos_endpoint.clone(),
            cosmos_key: None,
            mongo_uri: self.mongo_uri.clone(),
            storage_connection_string: self.storage_connection_string.clone(),
            service_bus_connection_string: self.service_bus_connection_string.clone(),
            service_bus_queue: self.service_bus_queue.clone(),
            receive_wait_secs: self.receive_wait_secs,
            container_runtime: self.container_runtime.clone(),
        }
    }
}

fn selected(groups: &[Group]) -> Vec<Group> {
    if groups.is_empty() {
        Group::ALL.to_vec()
    } else {
        let mut unique = Vec::new();
        for group in groups {
            if !unique.contains(group) {
                unique.push(*group);
            }
        }
        unique
    }
}

/// Totals across scenario outcomes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn tally<'a>(outcomes: impl IntoIterator<Item = &'a ScenarioOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome {
                ScenarioOutcome::Passed { .. } => summary.passed += 1,
                ScenarioOutcome::Failed { .. } => summary.failed += 1,
                ScenarioOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn exit_code(&self, require_all: bool) -> u8 {
        if self.failed > 0 {
            EXIT_FAILED
        } else if require_all && self.skipped > 0 {
            EXIT_SKIPPED
        } else {
            EXIT_SUCCESS
        }
    }
}

pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    crate::init_tracing_with(if cli.verbose {
        "debug"
    } else {
        "warn,emulator_smoke=info"
    });

    let config = match EmulatorConfig::load(cli.config.as_deref(), &cli.overrides()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Ok(ExitCode::from(EXIT_USAGE));
        }
    };

    let code = match cli.command {
        Commands::Config => {
            println!("{}", config);
            EXIT_SUCCESS
        }
        Commands::Probe { groups } => probe(&selected(&groups), &config).await,
        Commands::Diagnose { groups } => {
            for group in selected(&groups) {
                println!("{}", diagnostics::collect(group, &config).await);
            }
            EXIT_SUCCESS
        }
        Commands::Run {
            groups,
            require_all,
        } => run_scenarios(&selected(&groups), &config, require_all).await,
    };
    Ok(ExitCode::from(code))
}

async fn probe(groups: &[Group], config: &EmulatorConfig) -> u8 {
    let mut failed = false;
    for &group in groups {
        let probes = match group_probes(group, config).await {
            Ok(probes) => probes,
            Err(e) => {
                println!("{:<12} ERROR {}", group, e);
                failed = true;
                continue;
            }
        };
        if probes.is_empty() {
            println!("{:<12} SKIP  built without the `{}` feature", group, group);
        }
        for probe in probes {
            match probe.health_check().await {
                Ok(()) => println!("{:<12} OK    {}", probe.name(), probe.endpoint()),
                Err(e) => {
                    println!("{:<12} FAIL  {}: {}", probe.name(), probe.endpoint(), e);
                    failed = true;
                }
            }
        }
    }
    if failed {
        EXIT_FAILED
    } else {
        EXIT_SUCCESS
    }
}

async fn run_scenarios(groups: &[Group], config: &EmulatorConfig, require_all: bool) -> u8 {
    let mut outcomes = Vec::new();
    for &group in groups {
        for outcome in run_group(group, config).await {
            println!("{}", outcome);
            if let ScenarioOutcome::Skipped { skip, .. } = &outcome {
                if let Some(diagnostics) = &skip.diagnostics {
                    eprintln!("{}", diagnostics);
                }
            }
            outcomes.push(outcome);
        }
    }

    let summary = Summary::tally(&outcomes);
    println!(
        "{} passed, {} failed, {} skipped",
        summary.passed, summary.failed, summary.skipped
    );
    summary.exit_code(require_all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Skip;
    use crate::scenarios::Scenario;
    use clap::Parser;

    #[test]
    fn test_cli_parse_run_groups() {
        let cli = Cli::try_parse_from([
            "emulator-smoke",
            "run",
            "--group",
            "storage",
            "--group",
            "service-bus",
            "--require-all",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                groups,
                require_all,
            } => {
                assert_eq!(groups, vec![Group::Storage, Group::ServiceBus]);
                assert!(require_all);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "emulator-smoke",
            "probe",
            "--cosmos-endpoint",
            "https://127.0.0.1:9081/",
            "--receive-wait",
            "9",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.cosmos_endpoint.as_deref(), Some("https://127.0.0.1:9081/"));
        assert_eq!(cli.receive_wait_secs, Some(9));
        assert!(cli.verbose);
        let overrides = cli.overrides();
        assert_eq!(overrides.receive_wait_secs, Some(9));
        assert!(overrides.cosmos_key.is_none());
    }

    #[test]
    fn test_cli_rejects_unknown_group() {
        assert!(Cli::try_parse_from(["emulator-smoke", "run", "--group", "eventhub"]).is_err());
    }

    #[test]
    fn test_cli_parse_config() {
        let cli = Cli::try_parse_from(["emulator-smoke", "config"]).unwrap();
        assert!(matches!(cli.command, Commands::Config));
    }

    #[test]
    fn test_selected_defaults_to_all_and_dedups() {
        assert_eq!(selected(&[]), Group::ALL.to_vec());
        assert_eq!(
            selected(&[Group::Mongo, Group::Cosmos, Group::Mongo]),
            vec![Group::Mongo, Group::Cosmos]
        );
    }

    fn skipped(scenario: Scenario) -> ScenarioOutcome {
        ScenarioOutcome::Skipped {
            scenario,
            skip: Skip {
                group: scenario.group(),
                reason: "unreachable".into(),
                diagnostics: None,
            },
        }
    }

    #[test]
    fn test_summary_exit_codes() {
        let outcomes = vec![skipped(Scenario::CosmosCrud), skipped(Scenario::BlobCrud)];
        let summary = Summary::tally(&outcomes);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.exit_code(false), EXIT_SUCCESS);
        assert_eq!(summary.exit_code(true), EXIT_SKIPPED);

        let failing = Summary {
            passed: 3,
            failed: 1,
            skipped: 1,
        };
        assert_eq!(failing.exit_code(false), EXIT_FAILED);
        assert_eq!(failing.exit_code(true), EXIT_FAILED);
    }
}
