//! Emulator connection settings
//!
//! Every setting has a built-in default pointing at the locally run
//! emulators with their publicly documented development keys. Values can be
//! overridden with precedence: CLI > env > file > default.

use base64::Engine;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Well-known master key of the Cosmos DB emulator
pub const COSMOS_EMULATOR_KEY: &str =
    "C2y6yDjf5/R+ob0N8A7Cgv30VRDJIWEHLM+4QDU5DE2nQ9nDuVTqobD4b8mGGyPMbIZnqyMsEcaGQy67XIw/Jw==";

/// Default Cosmos DB emulator endpoint (native API)
pub const COSMOS_EMULATOR_ENDPOINT: &str = "https://localhost:8081";

/// Default Cosmos DB emulator endpoint (MongoDB API)
pub const MONGO_EMULATOR_URI: &str = "mongodb://localhost:C2y6yDjf5%2FR%2Bob0N8A7Cgv30VRDJIWEHLM%2B4QDU5DE2nQ9nDuVTqobD4b8mGGyPMbIZnqyMsEcaGQy67XIw%2FJw%3D%3D@localhost:10255/admin?ssl=true&tlsAllowInvalidCertificates=true&retrywrites=false";

/// Well-known Azurite account
pub const AZURITE_ACCOUNT: &str = "devstoreaccount1";

/// Well-known Azurite account key
pub const AZURITE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

/// Azurite connection string with explicit endpoints
pub const AZURITE_CONNECTION_STRING: &str = "DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;\
AccountKey=Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==;\
BlobEndpoint=http://localhost:10000/devstoreaccount1;\
QueueEndpoint=http://localhost:10001/devstoreaccount1;\
TableEndpoint=http://localhost:10002/devstoreaccount1;";

/// Service Bus emulator connection string
pub const SERVICE_BUS_EMULATOR_CONNECTION_STRING: &str = "Endpoint=sb://localhost;\
SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=SAS_KEY_VALUE;\
UseDevelopmentEmulator=true;";

/// Queue declared in the Service Bus emulator's default `Config.json`
pub const SERVICE_BUS_EMULATOR_QUEUE: &str = "queue.1";

/// Plain AMQP port served by the Service Bus emulator
pub const AMQP_PORT: u16 = 5672;

/// AMQP over TLS port of a cloud namespace
pub const AMQPS_PORT: u16 = 5671;

/// Default wait when pulling a single message off a queue
pub const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_secs(5);

/// Errors that can occur when building emulator settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Connection string segment without `=`
    #[error("malformed connection string segment: {0}")]
    MalformedSegment(String),

    /// Required connection string key missing
    #[error("connection string is missing required key {key}")]
    MissingKey { key: &'static str },

    /// Account or shared access key is not usable
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid URL format
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A scalar setting failed to parse
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    /// Explicitly requested config file does not exist
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A credential that must not show up in logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw credential
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "{}****", prefix)
    }
}

/// Split an Azure-style `Key=Value;Key=Value` connection string
///
/// Values may themselves contain `=` (base64 padding), so each segment is
/// split on the first `=` only. Empty segments are ignored.
pub fn parse_connection_string(input: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut pairs = BTreeMap::new();
    for segment in input.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedSegment(segment.to_string()))?;
        pairs.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(pairs)
}

fn required<'a>(
    pairs: &'a BTreeMap<String, String>,
    key: &'static str,
) -> Result<&'a str, ConfigError> {
    pairs
        .get(key)
        .map(String::as_str)
        .ok_or(ConfigError::MissingKey { key })
}

/// Cosmos DB native API settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmosSettings {
    pub endpoint: Url,
    pub key: Secret,
    /// The emulator serves a self-signed certificate
    pub accept_invalid_certs: bool,
}

impl Default for CosmosSettings {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(COSMOS_EMULATOR_ENDPOINT).expect("valid default endpoint"),
            key: Secret::new(COSMOS_EMULATOR_KEY),
            accept_invalid_certs: true,
        }
    }
}

/// Cosmos DB MongoDB API settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoSettings {
    pub uri: Secret,
}

impl Default for MongoSettings {
    fn default() -> Self {
        Self {
            uri: Secret::new(MONGO_EMULATOR_URI),
        }
    }
}

/// Blob/queue/table storage settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub account_name: String,
    pub account_key: Secret,
    pub blob_endpoint: Url,
    pub queue_endpoint: Url,
    pub table_endpoint: Url,
}

impl StorageSettings {
    /// Parse a storage account connection string
    ///
    /// Explicit `BlobEndpoint`/`QueueEndpoint`/`TableEndpoint` values win;
    /// otherwise endpoints are derived from `DefaultEndpointsProtocol`,
    /// `AccountName` and `EndpointSuffix`. `UseDevelopmentStorage=true`
    /// yields the Azurite defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingKey` if `AccountName` or `AccountKey` is
    /// absent and `ConfigError::InvalidKey` if the key is not base64.
    pub fn from_connection_string(input: &str) -> Result<Self, ConfigError> {
        let pairs = parse_connection_string(input)?;

        if pairs
            .get("UseDevelopmentStorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Self::from_connection_string(AZURITE_CONNECTION_STRING);
        }

        let account_name = required(&pairs, "AccountName")?.to_string();
        let account_key = required(&pairs, "AccountKey")?;
        base64::engine::general_purpose::STANDARD
            .decode(account_key)
            .map_err(|e| ConfigError::InvalidKey(format!("AccountKey is not base64: {}", e)))?;

        let protocol = pairs
            .get("DefaultEndpointsProtocol")
            .map(String::as_str)
            .unwrap_or("https");
        let suffix = pairs
            .get("EndpointSuffix")
            .map(String::as_str)
            .unwrap_or("core.windows.net");

        let endpoint = |key: &str, service: &str| -> Result<Url, ConfigError> {
            match pairs.get(key) {
                Some(explicit) => Ok(Url::parse(explicit)?),
                None => Ok(Url::parse(&format!(
                    "{}://{}.{}.{}",
                    protocol, account_name, service, suffix
                ))?),
            }
        };

        Ok(Self {
            blob_endpoint: endpoint("BlobEndpoint", "blob")?,
            queue_endpoint: endpoint("QueueEndpoint", "queue")?,
            table_endpoint: endpoint("TableEndpoint", "table")?,
            account_key: Secret::new(account_key),
            account_name,
        })
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::from_connection_string(AZURITE_CONNECTION_STRING)
            .expect("valid default Azurite connection string")
    }
}

/// Service Bus settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBusSettings {
    /// AMQP address of the namespace
    pub endpoint: Url,
    pub key_name: String,
    pub key: Secret,
    /// Plain AMQP without TLS, as the emulator serves it
    pub development: bool,
    /// Queue the scenarios use; the emulator only serves queues declared
    /// in its own config
    pub queue: String,
}

impl ServiceBusSettings {
    /// Parse a Service Bus connection string
    ///
    /// `sb://` endpoints are mapped to `amqp://host:5672/` for local hosts
    /// (or when `UseDevelopmentEmulator=true`) and to `amqps://host:5671/`
    /// otherwise. A port in the endpoint is dropped: AMQP clients always
    /// dial the standard port. `EntityPath` names the queue, falling back
    /// to the emulator's `queue.1`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingKey` if `Endpoint`, `SharedAccessKeyName`
    /// or `SharedAccessKey` is absent.
    pub fn from_connection_string(input: &str) -> Result<Self, ConfigError> {
        let pairs = parse_connection_string(input)?;

        let raw_endpoint = Url::parse(required(&pairs, "Endpoint")?)?;
        let key_name = required(&pairs, "SharedAccessKeyName")?.to_string();
        let key = required(&pairs, "SharedAccessKey")?;
        if key.is_empty() {
            return Err(ConfigError::InvalidKey("SharedAccessKey is empty".into()));
        }

        let host = raw_endpoint
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidValue {
                name: "Endpoint",
                value: raw_endpoint.to_string(),
            })?;
        let development = is_local_host(host)
            || pairs
                .get("UseDevelopmentEmulator")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let endpoint = amqp_endpoint(host, development)?;

        Ok(Self {
            endpoint,
            key_name,
            key: Secret::new(key),
            development,
            queue: pairs
                .get("EntityPath")
                .cloned()
                .unwrap_or_else(|| SERVICE_BUS_EMULATOR_QUEUE.to_string()),
        })
    }

    /// Connection string in the form the AMQP client accepts
    ///
    /// Carries only the namespace and the key; the queue is picked per
    /// sender and receiver.
    pub fn connection_string(&self) -> Secret {
        Secret::new(format!(
            "Endpoint=sb://{}/;SharedAccessKeyName={};SharedAccessKey={}",
            self.endpoint.host_str().unwrap_or("localhost"),
            self.key_name,
            self.key.expose()
        ))
    }
}

impl Default for ServiceBusSettings {
    fn default() -> Self {
        Self::from_connection_string(SERVICE_BUS_EMULATOR_CONNECTION_STRING)
            .expect("valid default Service Bus connection string")
    }
}

fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
}

fn amqp_endpoint(host: &str, development: bool) -> Result<Url, ConfigError> {
    let (scheme, port) = if development {
        ("amqp", AMQP_PORT)
    } else {
        ("amqps", AMQPS_PORT)
    };
    Ok(Url::parse(&format!("{}://{}:{}/", scheme, host, port))?)
}

/// Explicit overrides, typically from CLI flags
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub cosmos_endpoint: Option<String>,
    pub cosmos_key: Option<String>,
    pub mongo_uri: Option<String>,
    pub storage_connection_string: Option<String>,
    pub service_bus_connection_string: Option<String>,
    pub service_bus_queue: Option<String>,
    pub receive_wait_secs: Option<u64>,
    pub container_runtime: Option<String>,
}

/// Configuration file structure
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    receive_wait_secs: Option<u64>,
    container_runtime: Option<String>,
    cosmos: Option<CosmosSection>,
    mongo: Option<MongoSection>,
    storage: Option<StorageSection>,
    service_bus: Option<ServiceBusSection>,
}

#[derive(Debug, Deserialize)]
struct CosmosSection {
    endpoint: Option<String>,
    key: Option<String>,
    accept_invalid_certs: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MongoSection {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageSection {
    connection_string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceBusSection {
    connection_string: Option<String>,
    queue: Option<String>,
}

/// Settings for every emulator the harness talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub cosmos: CosmosSettings,
    pub mongo: MongoSettings,
    pub storage: StorageSettings,
    pub service_bus: ServiceBusSettings,
    /// Bounded wait when pulling a message off a queue
    pub receive_wait: Duration,
    /// Container runtime binary used for diagnostics
    pub container_runtime: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            cosmos: CosmosSettings::default(),
            mongo: MongoSettings::default(),
            storage: StorageSettings::default(),
            service_bus: ServiceBusSettings::default(),
            receive_wait: DEFAULT_RECEIVE_WAIT,
            container_runtime: "docker".to_string(),
        }
    }
}

impl EmulatorConfig {
    /// Load configuration with precedence: CLI > env > file > default
    ///
    /// `path` falls back to `EMULATOR_SMOKE_CONFIG`, then to the default
    /// location. Only an explicitly named file must exist.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let env_path = env("EMULATOR_SMOKE_CONFIG").map(PathBuf::from);
        let explicit = path.map(Path::to_path_buf).or(env_path);
        let file = Self::load_from_file(explicit.as_deref())?.unwrap_or_default();

        let cosmos_section = file.cosmos.as_ref();
        let mut cosmos = CosmosSettings::default();
        if let Some(endpoint) = overrides
            .cosmos_endpoint
            .clone()
            .or_else(|| env("EMULATOR_SMOKE_COSMOS_ENDPOINT"))
            .or_else(|| cosmos_section.and_then(|c| c.endpoint.clone()))
        {
            cosmos.endpoint = Url::parse(&endpoint)?;
        }
        if let Some(key) = overrides
            .cosmos_key
            .clone()
            .or_else(|| env("EMULATOR_SMOKE_COSMOS_KEY"))
            .or_else(|| cosmos_section.and_then(|c| c.key.clone()))
        {
            cosmos.key = Secret::new(key);
        }
        if let Some(accept) = cosmos_section.and_then(|c| c.accept_invalid_certs) {
            cosmos.accept_invalid_certs = accept;
        }

        let mongo = overrides
            .mongo_uri
            .clone()
            .or_else(|| env("EMULATOR_SMOKE_MONGO_URI"))
            .or_else(|| file.mongo.as_ref().and_then(|m| m.uri.clone()))
            .map(|uri| MongoSettings {
                uri: Secret::new(uri),
            })
            .unwrap_or_default();

        let storage = match overrides
            .storage_connection_string
            .clone()
            .or_else(|| env("EMULATOR_SMOKE_STORAGE_CONNECTION_STRING"))
            .or_else(|| file.storage.as_ref().and_then(|s| s.connection_string.clone()))
        {
            Some(conn) => StorageSettings::from_connection_string(&conn)?,
            None => StorageSettings::default(),
        };

        let bus_section = file.service_bus.as_ref();
        let mut service_bus = match overrides
            .service_bus_connection_string
            .clone()
            .or_else(|| env("EMULATOR_SMOKE_SERVICEBUS_CONNECTION_STRING"))
            .or_else(|| bus_section.and_then(|s| s.connection_string.clone()))
        {
            Some(conn) => ServiceBusSettings::from_connection_string(&conn)?,
            None => ServiceBusSettings::default(),
        };
        if let Some(queue) = overrides
            .service_bus_queue
            .clone()
            .or_else(|| env("EMULATOR_SMOKE_SERVICEBUS_QUEUE"))
            .or_else(|| bus_section.and_then(|s| s.queue.clone()))
        {
            service_bus.queue = queue;
        }

        let receive_wait_secs = match overrides.receive_wait_secs {
            Some(secs) => Some(secs),
            None => match env("EMULATOR_SMOKE_RECEIVE_WAIT_SECS") {
                Some(raw) => Some(raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    name: "EMULATOR_SMOKE_RECEIVE_WAIT_SECS",
                    value: raw,
                })?),
                None => file.receive_wait_secs,
            },
        };
        let receive_wait = receive_wait_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RECEIVE_WAIT);

        let container_runtime = overrides
            .container_runtime
            .clone()
            .or_else(|| env("EMULATOR_SMOKE_CONTAINER_RUNTIME"))
            .or(file.container_runtime)
            .unwrap_or_else(|| "docker".to_string());

        Ok(Self {
            cosmos,
            mongo,
            storage,
            service_bus,
            receive_wait,
            container_runtime,
        })
    }

    fn load_from_file(path: Option<&Path>) -> Result<Option<ConfigFile>, ConfigError> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::FileNotFound(p.to_path_buf()));
                }
                p.to_path_buf()
            }
            None => {
                let default = Self::default_config_path();
                if !default.exists() {
                    return Ok(None);
                }
                default
            }
        };

        let content = std::fs::read_to_string(&config_path)?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(Some(config))
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emulator-smoke")
            .join("config.toml")
    }
}

impl fmt::Display for EmulatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cosmos endpoint:      {}", self.cosmos.endpoint)?;
        writeln!(f, "Cosmos key:           {}", self.cosmos.key)?;
        writeln!(f, "Mongo URI:            {}", self.mongo.uri)?;
        writeln!(f, "Storage account:      {}", self.storage.account_name)?;
        writeln!(f, "Storage key:          {}", self.storage.account_key)?;
        writeln!(f, "Blob endpoint:        {}", self.storage.blob_endpoint)?;
        writeln!(f, "Queue endpoint:       {}", self.storage.queue_endpoint)?;
        writeln!(f, "Table endpoint:       {}", self.storage.table_endpoint)?;
        writeln!(f, "Service Bus endpoint: {}", self.service_bus.endpoint)?;
        writeln!(f, "Service Bus key name: {}", self.service_bus.key_name)?;
        writeln!(f, "Service Bus queue:    {}", self.service_bus.queue)?;
        writeln!(f, "Receive wait:         {:?}", self.receive_wait)?;
        write!(f, "Container runtime:    {}", self.container_runtime)
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
