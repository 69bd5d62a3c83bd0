use crate::app::ApplicationConfig;
use crate::applier::Applier;
use crate::bootstrap::{remove_dump, BootstrapMode, BulkLoader, DumpBootstrapper, TableLoad};
use crate::catalog::SchemaCatalog;
use crate::checkpoint::CheckpointStore;
use crate::error::{Error, ErrorPolicy};
use crate::queue::ReplicationQueue;
use crate::replication::ChangeCapture;
use crate::store::{DocumentStore, FileStore, MemoryStore, Sink};

use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::sync::mpsc::channel;
use tracing::{error, info, warn};

const NOTICE_CAPACITY: usize = 10000;

pub enum ApplicationCommand {
    Position(ApplicationConfig),
    Status(ApplicationConfig),
    Bootstrap(ApplicationConfig, BootstrapMode, Option<PathBuf>),
    LoadData(ApplicationConfig),
    Start(ApplicationConfig),
}

impl ApplicationCommand {
    fn config(&self) -> &ApplicationConfig {
        match self {
            Self::Position(config)
            | Self::Status(config)
            | Self::Bootstrap(config, ..)
            | Self::LoadData(config)
            | Self::Start(config) => config,
        }
    }
}

#[derive(Default)]
pub struct Application;

fn print_json(value: &Value) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Refuses to start capture until every database went through both dump
/// passes and every configured bulk table was loaded.
pub async fn readiness_gate<S: DocumentStore>(
    checkpoint: &CheckpointStore<S>,
    databases: &[String],
    tables: &[String],
) -> Result<(), Error> {
    for db in databases {
        checkpoint.ensure_ready(db).await?;

        if !tables.is_empty() {
            checkpoint.ensure_tables_loaded(db, tables).await?;
        }
    }

    Ok(())
}

fn worker_finished<T>(worker: &'static str, result: Result<T, Error>) -> Result<(), Error> {
    match result {
        Ok(_) => {
            info!(worker, "worker finished");
            Ok(())
        }
        Err(error) => {
            match error.policy() {
                ErrorPolicy::AbortProcess => error!(worker, %error, "stopping the process"),
                _ => error!(worker, %error, "worker failed"),
            }
            Err(error)
        }
    }
}

impl Application {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(self, command: ApplicationCommand) -> Result<(), Error> {
        let sink = command.config().sink().clone();

        match sink.path {
            Some(path) => {
                let store = FileStore::open(path).await?;
                self.execute(command, Sink::new(store, sink.util_database))
                    .await
            }
            None => {
                warn!("no sink path configured, documents are kept in memory only");
                self.execute(command, Sink::new(MemoryStore::new(), sink.util_database))
                    .await
            }
        }
    }

    pub async fn execute<S: DocumentStore>(
        self,
        command: ApplicationCommand,
        sink: Sink<S>,
    ) -> Result<(), Error> {
        match command {
            ApplicationCommand::Position(config) => {
                let database = config.create_database();
                let position = database.binlog_position().await?;
                database.disconnect().await?;

                print_json(&json!({
                    "file": position.file(),
                    "position": position.position(),
                }))
            }
            ApplicationCommand::Status(config) => print_json(&status(&config, sink).await?),
            ApplicationCommand::Bootstrap(config, mode, file) => {
                bootstrap(&config, sink, mode, file).await
            }
            ApplicationCommand::LoadData(config) => load_data(&config, sink).await,
            ApplicationCommand::Start(config) => start(&config, sink).await,
        }
    }
}

async fn status<S: DocumentStore>(config: &ApplicationConfig, sink: Sink<S>) -> Result<Value, Error> {
    let checkpoint = CheckpointStore::new(sink.clone());
    let queue = ReplicationQueue::open(sink).await?;
    let mut databases = Vec::with_capacity(config.databases().len());

    for db in config.databases() {
        let parsed = checkpoint.parsed_status(db).await?;

        databases.push(json!({
            "db": db,
            "schema": parsed.schema,
            "data": parsed.data,
            "tables": checkpoint.loaded_tables(db).await?,
        }));
    }

    Ok(json!({
        "checkpoint": checkpoint.read().await?.map(|position| json!({
            "log_file": position.file(),
            "log_pos": position.position(),
        })),
        "pending": queue.pending().await?,
        "databases": databases,
    }))
}

async fn bootstrap<S: DocumentStore>(
    config: &ApplicationConfig,
    sink: Sink<S>,
    mode: BootstrapMode,
    file: Option<PathBuf>,
) -> Result<(), Error> {
    let bootstrapper = DumpBootstrapper::new(sink);

    if let Some(path) = file {
        for pass in mode.passes() {
            let report = bootstrapper.ingest_file(&path, *pass).await?;
            info!(?pass, databases = ?report.databases, rows = report.rows, failed_rows = report.failed_rows, "dump ingested");
        }
        return Ok(());
    }

    let mysqldump = config.mysqldump();

    for db in config.databases() {
        let path = mysqldump.dump(db, mode).await?;

        for pass in mode.passes() {
            match bootstrapper.ingest_file(&path, *pass).await {
                Ok(report) => {
                    info!(db, ?pass, tables = report.tables, rows = report.rows, failed_rows = report.failed_rows, "dump ingested")
                }
                Err(error) => {
                    remove_dump(&path).await;
                    return Err(error);
                }
            }
        }

        remove_dump(&path).await;
    }

    Ok(())
}

async fn load_data<S: DocumentStore>(config: &ApplicationConfig, sink: Sink<S>) -> Result<(), Error> {
    let bulk = config.bulk();

    if bulk.tables.is_empty() {
        warn!("no bulk tables configured");
        return Ok(());
    }

    let database = config.create_database();
    let loader = BulkLoader::new(sink, database.clone(), bulk.work_dir.clone());
    let mut changed = Vec::new();

    for db in config.databases() {
        for (table, load) in loader.load_tables(db, &bulk.tables).await? {
            if let TableLoad::SourceChanged { .. } = load {
                changed.push(format!("{db}.{table}"));
            }
        }
    }

    database.disconnect().await?;

    match changed.is_empty() {
        true => Ok(()),
        false => Err(Error::TablesNotLoaded(changed)),
    }
}

async fn start<S: DocumentStore>(config: &ApplicationConfig, sink: Sink<S>) -> Result<(), Error> {
    let checkpoint = CheckpointStore::new(sink.clone());
    readiness_gate(&checkpoint, config.databases(), &config.bulk().tables).await?;

    let queue = ReplicationQueue::open(sink.clone()).await?;
    let (sender, receiver) = channel(NOTICE_CAPACITY);

    let capture = ChangeCapture::new(queue.clone(), checkpoint).with_notices(sender);
    let applier = Applier::new(
        sink.clone(),
        queue,
        SchemaCatalog::new(sink),
        config.applier_config(),
    );
    let log = config.binlog();

    info!(databases = ?config.databases(), "starting replication");

    tokio::select! {
        result = capture.run(&log) => worker_finished("capture", result),
        result = applier.run(receiver) => worker_finished("applier", result),
        signal = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping workers");
            Ok(signal?)
        }
    }
}
