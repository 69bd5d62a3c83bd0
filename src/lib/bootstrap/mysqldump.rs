use crate::bootstrap::DumpPass;
use crate::error::Error;
use mysql_async::Opts;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::File;
use tokio::process::Command;
use tracing::{debug, info};

/// Which bootstrap passes run for a database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapMode {
    Schema,
    Data,
    Complete,
}

impl BootstrapMode {
    pub fn passes(&self) -> &'static [DumpPass] {
        match self {
            Self::Schema => &[DumpPass::Schema],
            Self::Data => &[DumpPass::Data],
            Self::Complete => &[DumpPass::Schema, DumpPass::Data],
        }
    }

    /// Pass the dump is restricted to, a complete dump carries both.
    fn restricted_to(&self) -> Option<DumpPass> {
        match self {
            Self::Schema => Some(DumpPass::Schema),
            Self::Data => Some(DumpPass::Data),
            Self::Complete => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Data => "data",
            Self::Complete => "complete",
        }
    }
}

impl std::str::FromStr for BootstrapMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "schema" => Ok(Self::Schema),
            "data" => Ok(Self::Data),
            "complete" => Ok(Self::Complete),
            other => Err(Error::Configuration(format!(
                "unknown bootstrap mode {other}"
            ))),
        }
    }
}

/// Runs the `mysqldump` client to produce XML dumps of a source database.
#[derive(Clone, Debug)]
pub struct MysqlDump {
    binary: PathBuf,
    connection: Opts,
    extra_args: Vec<String>,
    work_dir: PathBuf,
}

impl MysqlDump {
    pub fn new(binary: impl Into<PathBuf>, connection: Opts, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            connection,
            extra_args: Vec::new(),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_extra_args(self, extra_args: Vec<String>) -> Self {
        Self { extra_args, ..self }
    }

    pub fn arguments(&self, db: &str, mode: BootstrapMode) -> Vec<String> {
        let mut arguments = vec![
            "--force".to_owned(),
            "--xml".to_owned(),
            "--master-data=2".to_owned(),
        ];

        match mode.restricted_to() {
            Some(DumpPass::Schema) => arguments.push("--no-data".to_owned()),
            Some(DumpPass::Data) => {
                arguments.push("--no-create-db".to_owned());
                arguments.push("--no-create-info".to_owned());
            }
            None => {}
        }

        match self.connection.socket() {
            Some(socket) => arguments.push(format!("--socket={socket}")),
            None => {
                arguments.push(format!("--host={}", self.connection.ip_or_hostname()));
                arguments.push(format!("--port={}", self.connection.tcp_port()));
            }
        }

        if let Some(user) = self.connection.user() {
            arguments.push(format!("--user={user}"));
        }

        if let Some(pass) = self.connection.pass() {
            arguments.push(format!("--password={pass}"));
        }

        arguments.extend(self.extra_args.iter().cloned());
        arguments.push(db.to_owned());
        arguments
    }

    pub fn dump_path(&self, db: &str, mode: BootstrapMode) -> PathBuf {
        self.work_dir
            .join(format!("{db}-{}-{}.xml", mode.as_str(), std::process::id()))
    }

    /// Dumps `db` into a file inside the work directory and returns its path.
    pub async fn dump(&self, db: &str, mode: BootstrapMode) -> Result<PathBuf, Error> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let path = self.dump_path(db, mode);
        let output = File::create(&path).await?.into_std().await;

        info!(db, mode = mode.as_str(), path = %path.display(), "running mysqldump");
        debug!(binary = %self.binary.display(), "mysqldump binary");

        let status = Command::new(&self.binary)
            .args(self.arguments(db, mode))
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .status()
            .await?;

        if !status.success() {
            remove_dump(&path).await;
            return Err(Error::Dump(format!("mysqldump for {db} exited with {status}")));
        }

        Ok(path)
    }
}

pub async fn remove_dump(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), %error, "failed to remove dump file");
    }
}
