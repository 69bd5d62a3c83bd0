#![allow(dead_code)]

use mysql_docsync::applier::{AcknowledgePolicy, Applier, ApplierConfig};
use mysql_docsync::bootstrap::{DumpBootstrapper, DumpPass};
use mysql_docsync::catalog::SchemaCatalog;
use mysql_docsync::checkpoint::CheckpointStore;
use mysql_docsync::document::Document;
use mysql_docsync::error::Error;
use mysql_docsync::queue::ReplicationQueue;
use mysql_docsync::replication::ChangeCapture;
use mysql_docsync::store::{MemoryStore, Namespace, Sink};
use mysql_docsync::test_util::ScriptedLog;
use std::time::Duration;

pub const UTIL_DATABASE: &str = "docsync";

pub const SCHEMA_DUMP: &str = r#"<?xml version="1.0"?>
<mysqldump xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<database name="shop">
	<table_structure name="orders">
		<field Field="id" Type="int(10) unsigned" Null="NO" Key="PRI" Extra="auto_increment" Comment="" />
		<field Field="total" Type="decimal(12,4)" Null="NO" Key="" Extra="" Comment="" />
		<key Table="orders" Non_unique="0" Key_name="PRIMARY" Seq_in_index="1" Column_name="id" />
	</table_structure>
	<table_structure name="logs">
		<field Field="id" Type="int(11)" Null="NO" Key="" Extra="" Comment="" />
		<field Field="msg" Type="varchar(255)" Null="YES" Key="" Extra="" Comment="" />
	</table_structure>
</database>
</mysqldump>
"#;

pub const DATA_DUMP: &str = r#"<?xml version="1.0"?>
<mysqldump xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<!--
-- Position to start replication or point-in-time recovery from
--

-- CHANGE MASTER TO MASTER_LOG_FILE='bin.000025', MASTER_LOG_POS=250160467;
-->
<database name="shop">
	<table_data name="orders">
	<row>
		<field name="id">5</field>
		<field name="total">10.0000</field>
	</row>
	<row>
		<field name="id">6</field>
		<field name="total">12.5000</field>
	</row>
	</table_data>
	<table_data name="logs">
	<row>
		<field name="id">9</field>
		<field name="msg">x</field>
	</row>
	<row>
		<field name="id">9</field>
		<field name="msg">y</field>
	</row>
	</table_data>
</database>
</mysqldump>
"#;

/// Memory backed sink with every component of the pipeline wired to it.
pub struct Pipeline {
    pub store: MemoryStore,
    pub sink: Sink<MemoryStore>,
    pub queue: ReplicationQueue<MemoryStore>,
    pub checkpoint: CheckpointStore<MemoryStore>,
}

impl Pipeline {
    pub async fn new() -> Result<Self, Error> {
        let store = MemoryStore::new();
        let sink = Sink::new(store.clone(), UTIL_DATABASE);

        Ok(Self {
            queue: ReplicationQueue::open(sink.clone()).await?,
            checkpoint: CheckpointStore::new(sink.clone()),
            store,
            sink,
        })
    }

    /// Runs both dump passes over the fixture dumps.
    pub async fn bootstrapped() -> Result<Self, Error> {
        let pipeline = Self::new().await?;
        let bootstrapper = DumpBootstrapper::new(pipeline.sink.clone());

        bootstrapper
            .ingest(SCHEMA_DUMP.as_bytes(), DumpPass::Schema)
            .await?;
        bootstrapper.ingest(DATA_DUMP.as_bytes(), DumpPass::Data).await?;

        Ok(pipeline)
    }

    pub fn capture(&self) -> ChangeCapture<MemoryStore> {
        ChangeCapture::new(self.queue.clone(), self.checkpoint.clone())
    }

    pub async fn capture_from(&self, log: &ScriptedLog) -> Result<usize, Error> {
        self.capture().run(log).await
    }

    pub fn applier(&self, acknowledge: AcknowledgePolicy) -> Applier<MemoryStore> {
        Applier::new(
            self.sink.clone(),
            self.queue.clone(),
            SchemaCatalog::new(self.sink.clone()),
            ApplierConfig {
                batch_size: 10,
                poll_interval: Duration::from_millis(10),
                idle_interval: Duration::from_millis(10),
                acknowledge,
            },
        )
    }

    pub async fn documents(&self, db: &str, table: &str) -> Vec<Document> {
        self.store.documents(&Namespace::new(db, table)).await
    }
}
