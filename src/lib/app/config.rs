use crate::applier::{AcknowledgePolicy, ApplierConfig};
use crate::bootstrap::MysqlDump;
use crate::database::Database;
use crate::error::Error as ApplicationError;
use crate::replication::{BinlogLog, CheckpointMode};

use mysql_async::{Opts, OptsBuilder};
use serde::de::{Error, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt::Formatter;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(PartialEq, Debug, Clone)]
pub struct ConnectionOpts(Opts);

#[derive(Deserialize, PartialEq, Debug, Clone)]
pub struct ApplicationConfig {
    connection: ConnectionOpts,
    databases: Vec<String>,
    #[serde(default)]
    server_id: Option<u32>,
    #[serde(default)]
    sink: SinkConfig,
    #[serde(default)]
    applier: ApplierSection,
    #[serde(default)]
    capture: CaptureConfig,
    #[serde(default)]
    dump: DumpConfig,
    #[serde(default)]
    bulk: BulkConfig,
}

#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct SinkConfig {
    /// Directory of the file backed sink, documents stay in memory without it.
    pub path: Option<PathBuf>,
    pub util_database: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: None,
            util_database: "docsync".into(),
        }
    }
}

#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct ApplierSection {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub idle_interval_ms: u64,
    pub acknowledge: AcknowledgePolicy,
}

impl Default for ApplierSection {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 5000,
            idle_interval_ms: 1000,
            acknowledge: AcknowledgePolicy::Batch,
        }
    }
}

#[derive(Deserialize, PartialEq, Debug, Clone, Default)]
#[serde(default)]
pub struct CaptureConfig {
    pub checkpoint: CheckpointMode,
}

#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct DumpConfig {
    pub mysqldump: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            mysqldump: "mysqldump".into(),
            args: Vec::new(),
            work_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct BulkConfig {
    pub tables: Vec<String>,
    pub work_dir: PathBuf,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            work_dir: std::env::temp_dir(),
        }
    }
}

impl ApplicationConfig {
    pub fn new(databases: Vec<String>, connection: impl Into<ConnectionOpts>) -> Self {
        Self {
            connection: connection.into(),
            databases,
            server_id: None,
            sink: SinkConfig::default(),
            applier: ApplierSection::default(),
            capture: CaptureConfig::default(),
            dump: DumpConfig::default(),
            bulk: BulkConfig::default(),
        }
    }

    /// Reads TOML (`toml`, `ini`, `cnf`) or JSON configuration, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ApplicationError> {
        let path = path.as_ref();
        let extension = path.extension().and_then(|extension| extension.to_str());
        let content = std::fs::read_to_string(path)?;

        match extension {
            Some("ini" | "toml" | "cnf") => toml::from_str(&content)
                .map_err(|error| ApplicationError::Configuration(error.to_string())),
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Err(ApplicationError::Configuration(format!(
                "Configuration file {} is not supported",
                path.display()
            ))),
        }
    }

    pub fn create_database(&self) -> Database {
        Database::new(self.connection.0.clone()).with_server_id(self.server_id)
    }

    pub fn connection(&self) -> &Opts {
        &self.connection.0
    }

    pub fn databases(&self) -> &[String] {
        &self.databases
    }

    pub fn sink(&self) -> &SinkConfig {
        &self.sink
    }

    pub fn bulk(&self) -> &BulkConfig {
        &self.bulk
    }

    pub fn applier_config(&self) -> ApplierConfig {
        ApplierConfig {
            batch_size: self.applier.batch_size,
            poll_interval: Duration::from_millis(self.applier.poll_interval_ms),
            idle_interval: Duration::from_millis(self.applier.idle_interval_ms),
            acknowledge: self.applier.acknowledge,
        }
    }

    /// Binary log of the configured databases.
    pub fn binlog(&self) -> BinlogLog {
        BinlogLog::new(self.create_database(), self.databases.clone())
            .with_checkpoint_mode(self.capture.checkpoint)
    }

    pub fn mysqldump(&self) -> MysqlDump {
        MysqlDump::new(
            self.dump.mysqldump.clone(),
            self.connection.0.clone(),
            self.dump.work_dir.clone(),
        )
        .with_extra_args(self.dump.args.clone())
    }

    pub fn with_sink(self, sink: SinkConfig) -> Self {
        Self { sink, ..self }
    }

    pub fn with_applier(self, applier: ApplierSection) -> Self {
        Self { applier, ..self }
    }

    pub fn with_bulk(self, bulk: BulkConfig) -> Self {
        Self { bulk, ..self }
    }
}

impl<'de> Deserialize<'de> for ConnectionOpts {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ConnectionVisitor;

        enum ConnectionKey {
            Socket,
            User,
            Pass,
            Host,
            Port,
            StmtCacheSize,
            MaxAllowedPacket,
        }

        impl<'de> Deserialize<'de> for ConnectionKey {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                struct ConnectionKeyVisitor;

                impl<'de> Visitor<'de> for ConnectionKeyVisitor {
                    type Value = ConnectionKey;

                    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                        formatter.write_str("a source connection option name")
                    }

                    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
                    where
                        E: Error,
                    {
                        Ok(match value {
                            "socket" => ConnectionKey::Socket,
                            "user" => ConnectionKey::User,
                            "pass" => ConnectionKey::Pass,
                            "host" => ConnectionKey::Host,
                            "port" => ConnectionKey::Port,
                            "stmt_cache_size" => ConnectionKey::StmtCacheSize,
                            "max_allowed_packet" => ConnectionKey::MaxAllowedPacket,
                            other => {
                                return Err(E::custom(format!(
                                    "unknown connection key \"{other}\""
                                )))
                            }
                        })
                    }
                }

                deserializer.deserialize_identifier(ConnectionKeyVisitor)
            }
        }

        impl<'de> Visitor<'de> for ConnectionVisitor {
            type Value = ConnectionOpts;

            fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                formatter.write_str("a MySQL URL or a table of source connection options")
            }

            fn visit_str<E>(self, url: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                Opts::from_url(url)
                    .map(ConnectionOpts)
                    .map_err(|error| E::custom(error.to_string()))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut builder = OptsBuilder::default();

                while let Some(key) = map.next_key::<ConnectionKey>()? {
                    builder = match key {
                        ConnectionKey::Socket => builder.socket(Some(map.next_value::<String>()?)),
                        ConnectionKey::User => builder.user(Some(map.next_value::<String>()?)),
                        ConnectionKey::Pass => builder.pass(Some(map.next_value::<String>()?)),
                        ConnectionKey::Host => builder.ip_or_hostname(map.next_value::<String>()?),
                        ConnectionKey::Port => builder.tcp_port(map.next_value()?),
                        ConnectionKey::StmtCacheSize => {
                            builder.stmt_cache_size(Some(map.next_value()?))
                        }
                        ConnectionKey::MaxAllowedPacket => {
                            builder.max_allowed_packet(Some(map.next_value()?))
                        }
                    }
                }

                Ok(ConnectionOpts(builder.into()))
            }
        }

        deserializer.deserialize_any(ConnectionVisitor)
    }
}

impl From<Opts> for ConnectionOpts {
    fn from(value: Opts) -> Self {
        ConnectionOpts(value)
    }
}

impl From<OptsBuilder> for ConnectionOpts {
    fn from(value: OptsBuilder) -> Self {
        ConnectionOpts(value.into())
    }
}
