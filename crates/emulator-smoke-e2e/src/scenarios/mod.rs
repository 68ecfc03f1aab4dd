//! CRUD and send/receive scenarios
//!
//! Every scenario follows the same shape: create, read back and verify,
//! update, read back and verify, delete, then verify the resource is gone.
//! Steps are timed and recorded; the first failing step ends the scenario
//! with a typed [`ScenarioError`]. Nothing in here panics on a failed check.
//!
//! [`run_scenario`] wraps a scenario in probe, setup and teardown, and
//! teardown always runs once setup succeeded.

mod cosmos;
mod mongo;
mod service_bus;
mod storage;

pub use cosmos::cosmos_crud;
#[cfg(feature = "mongo")]
pub use mongo::mongo_crud;
pub use service_bus::service_bus_send_receive;
pub use storage::{blob_crud, queue_send_receive, table_crud};

use crate::cleanup::CleanupReport;
use crate::fixtures::{
    check_reachable, CosmosFixture, FixtureError, ServiceBusFixture, Skip, StorageFixture,
};
use emulator_smoke_clients::{
    BlobServiceClient, ClientError, CosmosClient, EmulatorConfig, EmulatorProbe,
    QueueServiceClient, ServiceBusClient, TableServiceClient,
};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One emulator API's scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Group {
    Cosmos,
    Mongo,
    Storage,
    #[value(name = "service-bus")]
    ServiceBus,
}

impl Group {
    pub const ALL: [Group; 4] = [Group::Cosmos, Group::Mongo, Group::Storage, Group::ServiceBus];

    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Cosmos => "cosmos",
            Group::Mongo => "mongo",
            Group::Storage => "storage",
            Group::ServiceBus => "service-bus",
        }
    }

    pub fn scenarios(&self) -> &'static [Scenario] {
        match self {
            Group::Cosmos => &[Scenario::CosmosCrud],
            Group::Mongo => &[Scenario::MongoCrud],
            Group::Storage => &[
                Scenario::BlobCrud,
                Scenario::QueueSendReceive,
                Scenario::TableCrud,
            ],
            Group::ServiceBus => &[Scenario::ServiceBusSendReceive],
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    CosmosCrud,
    MongoCrud,
    BlobCrud,
    QueueSendReceive,
    TableCrud,
    ServiceBusSendReceive,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::CosmosCrud => "cosmos-crud",
            Scenario::MongoCrud => "mongo-crud",
            Scenario::BlobCrud => "blob-crud",
            Scenario::QueueSendReceive => "queue-send-receive",
            Scenario::TableCrud => "table-crud",
            Scenario::ServiceBusSendReceive => "service-bus-send-receive",
        }
    }

    pub fn group(&self) -> Group {
        match self {
            Scenario::CosmosCrud => Group::Cosmos,
            Scenario::MongoCrud => Group::Mongo,
            Scenario::BlobCrud | Scenario::QueueSendReceive | Scenario::TableCrud => Group::Storage,
            Scenario::ServiceBusSendReceive => Group::ServiceBus,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A step that completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub name: &'static str,
    pub elapsed: Duration,
}

/// Steps of a scenario that passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub steps: Vec<StepOutcome>,
}

impl ScenarioReport {
    pub fn group(&self) -> Group {
        self.scenario.group()
    }

    pub fn elapsed(&self) -> Duration {
        self.steps.iter().map(|s| s.elapsed).sum()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("step '{step}': expected {expected}, got {actual}")]
    Mismatch {
        step: &'static str,
        expected: String,
        actual: String,
    },

    #[error("step '{step}': {resource} still readable after delete")]
    StillPresent {
        step: &'static str,
        resource: String,
    },

    #[error("setup failed: {0}")]
    Setup(#[from] FixtureError),
}

impl ScenarioError {
    /// Name of the failing step, if the failure happened inside one
    pub fn step(&self) -> Option<&'static str> {
        match self {
            ScenarioError::Step { step, .. }
            | ScenarioError::Mismatch { step, .. }
            | ScenarioError::StillPresent { step, .. } => Some(step),
            ScenarioError::Setup(_) => None,
        }
    }
}

/// Records step timings while a scenario runs
#[derive(Debug)]
pub(crate) struct Recorder {
    scenario: Scenario,
    steps: Vec<StepOutcome>,
}

impl Recorder {
    pub(crate) fn new(scenario: Scenario) -> Self {
        debug!(scenario = %scenario, "Starting scenario");
        Self {
            scenario,
            steps: Vec::new(),
        }
    }

    /// Run one client call as a named step
    pub(crate) async fn step<T, Fut>(&mut self, name: &'static str, call: Fut) -> Result<T, ScenarioError>
    where
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let started = Instant::now();
        let value = call
            .await
            .map_err(|source| ScenarioError::Step { step: name, source })?;
        let elapsed = started.elapsed();
        debug!(scenario = %self.scenario, step = name, ?elapsed, "Step passed");
        self.steps.push(StepOutcome { name, elapsed });
        Ok(value)
    }

    /// Compare a value read back against what was written
    pub(crate) fn expect_eq<T>(&self, step: &'static str, expected: T, actual: T) -> Result<(), ScenarioError>
    where
        T: PartialEq + fmt::Debug,
    {
        if expected == actual {
            return Ok(());
        }
        Err(ScenarioError::Mismatch {
            step,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        })
    }

    /// Read after delete: must not succeed
    ///
    /// `NotFound` is the expected answer. Other errors still count as absent
    /// but are logged with their kind.
    pub(crate) async fn verify_absent<T, Fut>(
        &mut self,
        name: &'static str,
        resource: &str,
        read: Fut,
    ) -> Result<(), ScenarioError>
    where
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let started = Instant::now();
        match read.await {
            Ok(_) => {
                return Err(ScenarioError::StillPresent {
                    step: name,
                    resource: resource.to_string(),
                })
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(
                    scenario = %self.scenario,
                    resource,
                    error = %e,
                    "Read after delete failed with something other than not-found"
                );
            }
        }
        self.steps.push(StepOutcome {
            name,
            elapsed: started.elapsed(),
        });
        Ok(())
    }

    pub(crate) fn finish(self) -> ScenarioReport {
        ScenarioReport {
            scenario: self.scenario,
            steps: self.steps,
        }
    }
}

/// Final result of one scenario run
#[derive(Debug)]
pub enum ScenarioOutcome {
    Passed {
        report: ScenarioReport,
        cleanup: CleanupReport,
    },
    Failed {
        scenario: Scenario,
        error: ScenarioError,
        /// `None` when setup failed before a fixture existed
        cleanup: Option<CleanupReport>,
    },
    Skipped {
        scenario: Scenario,
        skip: Skip,
    },
}

impl ScenarioOutcome {
    pub fn scenario(&self) -> Scenario {
        match self {
            ScenarioOutcome::Passed { report, .. } => report.scenario,
            ScenarioOutcome::Failed { scenario, .. } | ScenarioOutcome::Skipped { scenario, .. } => {
                *scenario
            }
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, ScenarioOutcome::Passed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ScenarioOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ScenarioOutcome::Skipped { .. })
    }

    fn settle(
        scenario: Scenario,
        result: Result<ScenarioReport, ScenarioError>,
        cleanup: CleanupReport,
    ) -> Self {
        if !cleanup.is_clean() {
            warn!(scenario = %scenario, cleanup = %cleanup, "Teardown incomplete");
        }
        match result {
            Ok(report) => {
                info!(scenario = %scenario, steps = report.steps.len(), "Scenario passed");
                ScenarioOutcome::Passed { report, cleanup }
            }
            Err(error) => {
                warn!(scenario = %scenario, error = %error, "Scenario failed");
                ScenarioOutcome::Failed {
                    scenario,
                    error,
                    cleanup: Some(cleanup),
                }
            }
        }
    }

    fn unsupported(scenario: Scenario) -> Self {
        ScenarioOutcome::Skipped {
            scenario,
            skip: Skip {
                group: scenario.group(),
                reason: "built without the `mongo` feature".to_string(),
                diagnostics: None,
            },
        }
    }

    fn setup_failed(scenario: Scenario, error: FixtureError) -> Self {
        warn!(scenario = %scenario, error = %error, "Scenario setup failed");
        ScenarioOutcome::Failed {
            scenario,
            error: ScenarioError::Setup(error),
            cleanup: None,
        }
    }
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioOutcome::Passed { report, cleanup } => write!(
                f,
                "PASS {} ({} steps, {:?}; {})",
                report.scenario,
                report.steps.len(),
                report.elapsed(),
                cleanup
            ),
            ScenarioOutcome::Failed {
                scenario,
                error,
                cleanup,
            } => {
                write!(f, "FAIL {}: {}", scenario, error)?;
                if let Some(cleanup) = cleanup {
                    write!(f, " ({})", cleanup)?;
                }
                Ok(())
            }
            ScenarioOutcome::Skipped { scenario, skip } => {
                write!(f, "SKIP {}: {}", scenario, skip.reason)
            }
        }
    }
}

/// Client whose health decides whether `scenario` runs
async fn probe_for(
    scenario: Scenario,
    config: &EmulatorConfig,
) -> Result<Option<Box<dyn EmulatorProbe>>, ClientError> {
    let probe: Box<dyn EmulatorProbe> = match scenario {
        Scenario::CosmosCrud => Box::new(CosmosClient::new(&config.cosmos)?),
        #[cfg(feature = "mongo")]
        Scenario::MongoCrud => Box::new(
            emulator_smoke_clients::mongo::MongoClient::connect(&config.mongo).await?,
        ),
        #[cfg(not(feature = "mongo"))]
        Scenario::MongoCrud => return Ok(None),
        Scenario::BlobCrud => Box::new(BlobServiceClient::new(&config.storage)?),
        Scenario::QueueSendReceive => Box::new(QueueServiceClient::new(&config.storage)?),
        Scenario::TableCrud => Box::new(TableServiceClient::new(&config.storage)?),
        Scenario::ServiceBusSendReceive => Box::new(ServiceBusClient::new(&config.service_bus)?),
    };
    Ok(Some(probe))
}

/// Set up `$fixture`, run `$body` against it, always tear down
macro_rules! with_fixture {
    ($scenario:expr, $config:expr, $fixture:ty, |$f:ident| $body:expr) => {{
        let $f = match <$fixture>::setup($config).await {
            Ok(fixture) => fixture,
            Err(e) => return ScenarioOutcome::setup_failed($scenario, e),
        };
        let result = $body.await;
        ScenarioOutcome::settle($scenario, result, $f.teardown().await)
    }};
}

/// Probe, set up, run and tear down one scenario
pub async fn run_scenario(scenario: Scenario, config: &EmulatorConfig) -> ScenarioOutcome {
    let group = scenario.group();
    let probe = match probe_for(scenario, config).await {
        Ok(Some(probe)) => probe,
        Ok(None) => return ScenarioOutcome::unsupported(scenario),
        Err(e) => return ScenarioOutcome::setup_failed(scenario, e.into()),
    };

    match check_reachable(probe.as_ref(), group, config).await {
        Ok(Ok(())) => {}
        Ok(Err(skip)) => return ScenarioOutcome::Skipped { scenario, skip },
        Err(e) => return ScenarioOutcome::setup_failed(scenario, e.into()),
    }

    match scenario {
        Scenario::CosmosCrud => {
            with_fixture!(scenario, config, CosmosFixture, |fixture| cosmos_crud(&fixture))
        }
        #[cfg(feature = "mongo")]
        Scenario::MongoCrud => {
            with_fixture!(scenario, config, crate::fixtures::MongoFixture, |fixture| {
                mongo_crud(&fixture)
            })
        }
        #[cfg(not(feature = "mongo"))]
        Scenario::MongoCrud => ScenarioOutcome::unsupported(scenario),
        Scenario::BlobCrud => {
            with_fixture!(scenario, config, StorageFixture, |fixture| blob_crud(&fixture))
        }
        Scenario::QueueSendReceive => {
            with_fixture!(scenario, config, StorageFixture, |fixture| {
                queue_send_receive(&fixture)
            })
        }
        Scenario::TableCrud => {
            with_fixture!(scenario, config, StorageFixture, |fixture| table_crud(&fixture))
        }
        Scenario::ServiceBusSendReceive => {
            with_fixture!(scenario, config, ServiceBusFixture, |fixture| {
                service_bus_send_receive(&fixture, config.receive_wait)
            })
        }
    }
}

/// Run every scenario of a group in order
///
/// Each scenario gets a fresh fixture. Once the group's emulator proves
/// unreachable, the remaining scenarios are skipped without probing again.
pub async fn run_group(group: Group, config: &EmulatorConfig) -> Vec<ScenarioOutcome> {
    let mut outcomes = Vec::new();
    for &scenario in group.scenarios() {
        let outcome = run_scenario(scenario, config).await;
        let unreachable = outcome.is_skipped();
        outcomes.push(outcome);
        if unreachable {
            for &rest in &group.scenarios()[outcomes.len()..] {
                outcomes.push(ScenarioOutcome::Skipped {
                    scenario: rest,
                    skip: Skip {
                        group,
                        reason: format!("{} emulator unreachable", group),
                        diagnostics: None,
                    },
                });
            }
            break;
        }
    }
    outcomes
}
