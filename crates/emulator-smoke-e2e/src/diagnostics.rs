//! Connection-failure diagnostics
//!
//! When an emulator does not answer, the harness checks which endpoints
//! accept TCP connections and asks the container runtime what is running,
//! which ports it publishes and what it last logged. Nothing here fails:
//! a missing or broken runtime is recorded in the report.

use crate::scenarios::Group;
use emulator_smoke_clients::EmulatorConfig;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;
use url::Url;

/// How long a single TCP connect may take
pub const TCP_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Log lines collected per matching container
pub const LOG_TAIL: usize = 20;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} {command} exited with {status}: {stderr}")]
    Failed {
        binary: String,
        command: String,
        status: String,
        stderr: String,
    },
}

/// True when a TCP connection to `host:port` opens within `timeout`
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// One row of `ps` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub image: String,
    pub names: String,
    pub status: String,
}

impl ContainerInfo {
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        let info = Self {
            id: fields.next()?.trim().to_string(),
            image: fields.next()?.trim().to_string(),
            names: fields.next()?.trim().to_string(),
            status: fields.next().unwrap_or("").trim().to_string(),
        };
        (!info.id.is_empty()).then_some(info)
    }

    fn matches(&self, hint: &str) -> bool {
        let hint = hint.to_ascii_lowercase();
        self.image.to_ascii_lowercase().contains(&hint)
            || self.names.to_ascii_lowercase().contains(&hint)
    }
}

/// Docker-compatible container runtime CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRuntime {
    binary: String,
}

impl ContainerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn exec(&self, args: &[&str]) -> Result<String, DiagnosticsError> {
        debug!(binary = %self.binary, ?args, "Running container runtime");
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DiagnosticsError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DiagnosticsError::Failed {
                binary: self.binary.clone(),
                command: args.first().copied().unwrap_or_default().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // `logs` replays the container's stderr on ours
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    /// Containers (running or not) whose image or name contains `name_filter`
    pub async fn list_containers(&self, name_filter: &str) -> Result<Vec<ContainerInfo>, DiagnosticsError> {
        let output = self
            .exec(&[
                "ps",
                "--all",
                "--format",
                "{{.ID}}\t{{.Image}}\t{{.Names}}\t{{.Status}}",
            ])
            .await?;
        Ok(output
            .lines()
            .filter_map(ContainerInfo::parse)
            .filter(|info| info.matches(name_filter))
            .collect())
    }

    /// Last `tail` lines of a container's log
    pub async fn logs(&self, container: &str, tail: usize) -> Result<String, DiagnosticsError> {
        self.exec(&["logs", "--tail", &tail.to_string(), container])
            .await
    }

    /// Published port mappings, one `container/proto -> host:port` per entry
    pub async fn ports(&self, container: &str) -> Result<Vec<String>, DiagnosticsError> {
        let output = self.exec(&["port", container]).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

/// TCP reachability of one service endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCheck {
    pub service: &'static str,
    pub host: String,
    pub port: u16,
    pub reachable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDiagnostics {
    pub info: ContainerInfo,
    pub ports: Result<Vec<String>, String>,
    pub logs: Result<String, String>,
}

/// Everything collected for one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub group: Group,
    pub endpoints: Vec<EndpointCheck>,
    pub runtime: String,
    /// Set when the runtime could not list containers
    pub runtime_error: Option<String>,
    pub containers: Vec<ContainerDiagnostics>,
}

impl DiagnosticReport {
    pub fn any_reachable(&self) -> bool {
        self.endpoints.iter().any(|e| e.reachable)
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Diagnostics for {}:", self.group)?;
        for endpoint in &self.endpoints {
            writeln!(
                f,
                "  {} {}:{} {}",
                endpoint.service,
                endpoint.host,
                endpoint.port,
                if endpoint.reachable { "open" } else { "closed" }
            )?;
        }

        if let Some(error) = &self.runtime_error {
            return write!(f, "  {} unavailable: {}", self.runtime, error);
        }
        if self.containers.is_empty() {
            return write!(
                f,
                "  no {} containers matching {:?}",
                self.runtime,
                image_hint(self.group)
            );
        }

        for container in &self.containers {
            writeln!(
                f,
                "  container {} ({}) image {} - {}",
                container.info.names, container.info.id, container.info.image, container.info.status
            )?;
            match &container.ports {
                Ok(ports) if ports.is_empty() => writeln!(f, "    ports: none published")?,
                Ok(ports) => writeln!(f, "    ports: {}", ports.join(", "))?,
                Err(e) => writeln!(f, "    ports: {}", e)?,
            }
            match &container.logs {
                Ok(logs) => {
                    writeln!(f, "    last {} log lines:", LOG_TAIL)?;
                    for line in logs.lines() {
                        writeln!(f, "      {}", line)?;
                    }
                }
                Err(e) => writeln!(f, "    logs: {}", e)?,
            }
        }
        Ok(())
    }
}

/// Substring of the image or container name that identifies a group's emulator
pub fn image_hint(group: Group) -> &'static str {
    match group {
        Group::Cosmos | Group::Mongo => "cosmos",
        Group::Storage => "azurite",
        Group::ServiceBus => "servicebus",
    }
}

fn host_port(url: &Url) -> Option<(String, u16)> {
    let host = url.host_str()?.trim_matches(['[', ']']).to_string();
    let port = url.port_or_known_default().or(match url.scheme() {
        "mongodb" => Some(27017),
        "amqp" => Some(5672),
        "amqps" => Some(5671),
        _ => None,
    })?;
    Some((host, port))
}

/// Endpoints a group talks to, as `(service, url)`
pub fn endpoints_for(group: Group, config: &EmulatorConfig) -> Vec<(&'static str, Url)> {
    match group {
        Group::Cosmos => vec![("cosmos", config.cosmos.endpoint.clone())],
        Group::Mongo => Url::parse(config.mongo.uri.expose())
            .map(|url| vec![("mongo", url)])
            .unwrap_or_default(),
        Group::Storage => vec![
            ("blob", config.storage.blob_endpoint.clone()),
            ("queue", config.storage.queue_endpoint.clone()),
            ("table", config.storage.table_endpoint.clone()),
        ],
        Group::ServiceBus => vec![("service-bus", config.service_bus.endpoint.clone())],
    }
}

/// Collect endpoint and container diagnostics for a group
pub async fn collect(group: Group, config: &EmulatorConfig) -> DiagnosticReport {
    let mut endpoints = Vec::new();
    for (service, url) in endpoints_for(group, config) {
        if let Some((host, port)) = host_port(&url) {
            let reachable = tcp_probe(&host, port, TCP_PROBE_TIMEOUT).await;
            endpoints.push(EndpointCheck {
                service,
                host,
                port,
                reachable,
            });
        }
    }

    let runtime = ContainerRuntime::new(&config.container_runtime);
    let mut report = DiagnosticReport {
        group,
        endpoints,
        runtime: runtime.binary().to_string(),
        runtime_error: None,
        containers: Vec::new(),
    };

    match runtime.list_containers(image_hint(group)).await {
        Ok(found) => {
            for info in found {
                let ports = runtime.ports(&info.id).await.map_err(|e| e.to_string());
                let logs = runtime
                    .logs(&info.id, LOG_TAIL)
                    .await
                    .map_err(|e| e.to_string());
                report.containers.push(ContainerDiagnostics { info, ports, logs });
            }
        }
        Err(e) => report.runtime_error = Some(e.to_string()),
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_ps_line() {
        let info = ContainerInfo::parse(
            "3f2a1b\tmcr.microsoft.com/azure-storage/azurite:latest\tazurite\tUp 2 minutes",
        )
        .unwrap();
        assert_eq!(info.id, "3f2a1b");
        assert_eq!(info.image, "mcr.microsoft.com/azure-storage/azurite:latest");
        assert_eq!(info.names, "azurite");
        assert!(info.matches("azurite"));
        assert!(!info.matches("cosmos"));
        assert!(ContainerInfo::parse("").is_none());
    }

    #[test]
    fn test_endpoints_for_defaults() {
        let config = EmulatorConfig::default();
        let storage: Vec<_> = endpoints_for(Group::Storage, &config)
            .iter()
            .filter_map(|(_, url)| host_port(url))
            .map(|(_, port)| port)
            .collect();
        assert_eq!(storage, vec![10000, 10001, 10002]);

        let mongo = endpoints_for(Group::Mongo, &config);
        assert_eq!(host_port(&mongo[0].1), Some(("localhost".to_string(), 10255)));

        let bus = endpoints_for(Group::ServiceBus, &config);
        assert_eq!(host_port(&bus[0].1), Some(("localhost".to_string(), 5672)));
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(tcp_probe("127.0.0.1", port, TCP_PROBE_TIMEOUT).await);

        drop(listener);
        assert!(!tcp_probe("127.0.0.1", port, TCP_PROBE_TIMEOUT).await);
    }

    #[tokio::test]
    async fn test_missing_runtime_is_recorded() {
        let config = EmulatorConfig {
            container_runtime: "emulator-smoke-no-such-runtime".to_string(),
            ..EmulatorConfig::default()
        };
        let report = collect(Group::ServiceBus, &config).await;
        assert!(report.runtime_error.is_some());
        assert!(report.containers.is_empty());
        let text = report.to_string();
        assert!(text.contains("emulator-smoke-no-such-runtime unavailable"));
    }

    #[test]
    fn test_report_display_lists_containers() {
        let report = DiagnosticReport {
            group: Group::Storage,
            endpoints: vec![EndpointCheck {
                service: "blob",
                host: "localhost".into(),
                port: 10000,
                reachable: false,
            }],
            runtime: "docker".into(),
            runtime_error: None,
            containers: vec![ContainerDiagnostics {
                info: ContainerInfo {
                    id: "abc".into(),
                    image: "azurite".into(),
                    names: "storage".into(),
                    status: "Exited (1)".into(),
                },
                ports: Ok(vec![]),
                logs: Ok("Azurite Blob service is starting".into()),
            }],
        };
        let text = report.to_string();
        assert!(text.contains("blob localhost:10000 closed"));
        assert!(text.contains("ports: none published"));
        assert!(text.contains("Azurite Blob service is starting"));
    }
}
