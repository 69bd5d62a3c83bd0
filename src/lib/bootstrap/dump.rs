use crate::bootstrap::fragment::{parse_fragment, Element};
use crate::bootstrap::scanner::{DumpItem, DumpScanner};
use crate::bootstrap::DumpPass;
use crate::catalog::{ColumnDefinition, SchemaCatalog, SchemaRecord};
use crate::checkpoint::CheckpointStore;
use crate::coercion::coerce_row;
use crate::error::Error;
use crate::replication::BinlogPosition;
use crate::store::{DocumentStore, Sink};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DumpReport {
    pub databases: Vec<String>,
    pub tables: usize,
    pub rows: usize,
    pub failed_rows: usize,
    pub position: Option<BinlogPosition>,
}

/// Streams an XML dump into the schema catalog or the sink.
#[derive(Clone, Debug)]
pub struct DumpBootstrapper<S> {
    sink: Sink<S>,
    catalog: SchemaCatalog<S>,
    checkpoint: CheckpointStore<S>,
}

#[derive(Default)]
struct Cursor {
    database: Option<String>,
    table: Option<String>,
}

impl<S> DumpBootstrapper<S>
where
    S: DocumentStore,
{
    pub fn new(sink: Sink<S>) -> Self {
        Self {
            catalog: SchemaCatalog::new(sink.clone()),
            checkpoint: CheckpointStore::new(sink.clone()),
            sink,
        }
    }

    pub async fn ingest_file(&self, path: impl AsRef<Path>, pass: DumpPass) -> Result<DumpReport, Error> {
        let file = File::open(path.as_ref()).await?;
        info!(path = %path.as_ref().display(), ?pass, "ingesting dump");

        self.ingest(BufReader::new(file), pass).await
    }

    pub async fn ingest<R>(&self, reader: R, pass: DumpPass) -> Result<DumpReport, Error>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut scanner = DumpScanner::new(pass);
        let mut cursor = Cursor::default();
        let mut report = DumpReport::default();

        while let Some(line) = lines.next_line().await? {
            if let Some(item) = scanner.feed(&line) {
                self.process(item, pass, &mut cursor, &mut report).await?;
            }
        }

        if scanner.is_inside_block() {
            warn!(?pass, "dump ended inside an unterminated block");
        }

        if let (DumpPass::Data, Some(position)) = (pass, &report.position) {
            self.checkpoint.write(position).await?;
            info!(log_file = position.file(), log_pos = position.position(), "recorded dump position");
        }

        for db in &report.databases {
            if let Err(error) = self.checkpoint.mark_parsed(db, pass).await {
                error!(db, %error, "failed to record parsed status");
            }
        }

        info!(?report, "dump ingested");
        Ok(report)
    }

    async fn process(
        &self,
        item: DumpItem,
        pass: DumpPass,
        cursor: &mut Cursor,
        report: &mut DumpReport,
    ) -> Result<(), Error> {
        match item {
            DumpItem::Database(db) => {
                if pass == DumpPass::Data {
                    info!(db, "dropping database before reload");
                    self.sink.drop_database(&db).await?;
                }

                if !report.databases.contains(&db) {
                    report.databases.push(db.clone());
                }
                cursor.database = Some(db);
                cursor.table = None;
            }
            DumpItem::TableData(table) => cursor.table = Some(table),
            DumpItem::Structure { table, fragment } => {
                let db = match &cursor.database {
                    Some(db) => db,
                    None => {
                        warn!(table, "table structure outside of a database block");
                        return Ok(());
                    }
                };

                let columns = parse_fragment(&fragment)
                    .into_iter()
                    .filter(|element| element.name == "field")
                    .filter_map(|field| {
                        Some(ColumnDefinition::new(
                            field.attribute("Field")?,
                            field.attribute("Key").unwrap_or_default(),
                            field.attribute("Type").unwrap_or_default(),
                        ))
                    });

                self.catalog
                    .put(&SchemaRecord::from_columns(db.as_str(), table, columns))
                    .await?;
                report.tables += 1;
            }
            DumpItem::Row(fragment) => match self.insert_row(cursor, &fragment).await {
                Ok(()) => report.rows += 1,
                Err(error) if !error.is_record_error() => return Err(error),
                Err(error) => {
                    report.failed_rows += 1;
                    error!(
                        db = cursor.database.as_deref(),
                        table = cursor.table.as_deref(),
                        policy = ?error.policy(),
                        %error,
                        "skipping dump row"
                    );
                }
            },
            DumpItem::LogPosition(position) => report.position = Some(position),
        }

        Ok(())
    }

    async fn insert_row(&self, cursor: &Cursor, fragment: &str) -> Result<(), Error> {
        let (db, table) = match (&cursor.database, &cursor.table) {
            (Some(db), Some(table)) => (db, table),
            _ => {
                return Err(Error::MalformedDocument(
                    "row outside of a table data block".into(),
                ))
            }
        };

        let record = self
            .catalog
            .get(db, table)
            .await?
            .unwrap_or_else(|| SchemaRecord::new(db.as_str(), table.as_str()));

        let document = coerce_row(
            parse_fragment(fragment)
                .into_iter()
                .filter(|element| element.name == "field")
                .filter_map(row_field),
            record.types(),
        )?;

        let namespace = self.sink.collection(db, table).await?;
        self.sink.store().insert_one(&namespace, document).await
    }
}

fn row_field(field: Element) -> Option<(String, Option<String>)> {
    let name = field.attribute("name")?.to_owned();
    let value = match field.is_nil() {
        true => None,
        false => Some(field.text.unwrap_or_default()),
    };

    Some((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::ParsedStatus;
    use crate::document::FieldValue;
    use crate::store::{MemoryStore, Namespace};
    use chrono::NaiveDate;

    const SCHEMA: &str = r#"<?xml version="1.0"?>
<mysqldump xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<database name="shop">
	<table_structure name="orders">
		<field Field="id" Type="int(11)" Null="NO" Key="PRI" Extra="auto_increment" Comment="" />
		<field Field="created_at" Type="datetime" Null="YES" Key="" Extra="" Comment="" />
		<key Table="orders" Non_unique="0" Key_name="PRIMARY" Seq_in_index="1" Column_name="id" />
	</table_structure>
</database>
</mysqldump>"#;

    const DATA: &str = r#"<?xml version="1.0"?>
<mysqldump xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<!--
CHANGE MASTER TO MASTER_LOG_FILE='bin.000025', MASTER_LOG_POS=250160467;
-->
<database name="shop">
	<table_data name="orders">
	<row>
		<field name="id">1</field>
		<field name="created_at">2010-04-28 00:00:00</field>
	</row>
	<row>
		<field name="id">not a number</field>
		<field name="created_at" xsi:nil="true" />
	</row>
	<row>
		<field name="id">3</field>
		<field name="created_at" xsi:nil="true" />
	</row>
	</table_data>
</database>
</mysqldump>"#;

    fn bootstrapper() -> (MemoryStore, DumpBootstrapper<MemoryStore>) {
        let store = MemoryStore::new();
        (
            store.clone(),
            DumpBootstrapper::new(Sink::new(store, "util")),
        )
    }

    #[tokio::test]
    async fn loads_schema_records() -> Result<(), Error> {
        let (store, bootstrapper) = bootstrapper();

        let report = bootstrapper.ingest(SCHEMA.as_bytes(), DumpPass::Schema).await?;
        let record = SchemaCatalog::new(Sink::new(store, "util"))
            .get("shop", "orders")
            .await?
            .unwrap();

        assert_eq!(report.tables, 1);
        assert_eq!(
            record,
            SchemaRecord::new("shop", "orders")
                .with_primary_key("id")
                .with_type("id", crate::coercion::DeclaredType::Int)
                .with_type("created_at", crate::coercion::DeclaredType::DateTime)
        );

        Ok(())
    }

    #[tokio::test]
    async fn loads_rows_skipping_failed_ones() -> Result<(), Error> {
        let (store, bootstrapper) = bootstrapper();

        bootstrapper.ingest(SCHEMA.as_bytes(), DumpPass::Schema).await?;
        let report = bootstrapper.ingest(DATA.as_bytes(), DumpPass::Data).await?;

        assert_eq!((report.rows, report.failed_rows), (2, 1));
        assert_eq!(
            store.documents(&Namespace::new("shop", "orders")).await,
            vec![
                document! {
                    "id" => 1,
                    "created_at" => NaiveDate::from_ymd_opt(2010, 4, 28)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap()
                },
                document! {"id" => 3, "created_at" => FieldValue::Null},
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn loads_unsigned_bigint_keys_and_fractional_datetimes() -> Result<(), Error> {
        let (store, bootstrapper) = bootstrapper();
        let schema = r#"<?xml version="1.0"?>
<mysqldump xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<database name="shop">
	<table_structure name="events">
		<field Field="id" Type="bigint(20) unsigned" Null="NO" Key="PRI" Extra="" Comment="" />
		<field Field="created_at" Type="datetime(6)" Null="NO" Key="" Extra="" Comment="" />
	</table_structure>
</database>
</mysqldump>"#;
        let data = r#"<?xml version="1.0"?>
<mysqldump xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<database name="shop">
	<table_data name="events">
	<row>
		<field name="id">18446744073709551615</field>
		<field name="created_at">2010-04-28 00:00:00.123456</field>
	</row>
	<row>
		<field name="id">7</field>
		<field name="created_at">2010-04-28 00:00:01</field>
	</row>
	</table_data>
</database>
</mysqldump>"#;

        bootstrapper.ingest(schema.as_bytes(), DumpPass::Schema).await?;
        let report = bootstrapper.ingest(data.as_bytes(), DumpPass::Data).await?;
        let day = NaiveDate::from_ymd_opt(2010, 4, 28).unwrap();

        assert_eq!((report.rows, report.failed_rows), (2, 0));
        assert_eq!(
            store.documents(&Namespace::new("shop", "events")).await,
            vec![
                document! {
                    "id" => "18446744073709551615",
                    "created_at" => day.and_hms_micro_opt(0, 0, 0, 123456).unwrap()
                },
                document! {"id" => 7, "created_at" => day.and_hms_opt(0, 0, 1).unwrap()},
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn records_position_and_parsed_status_after_data_pass() -> Result<(), Error> {
        let (store, bootstrapper) = bootstrapper();
        let checkpoint = CheckpointStore::new(Sink::new(store, "util"));

        bootstrapper.ingest(DATA.as_bytes(), DumpPass::Data).await?;

        assert_eq!(
            checkpoint.read().await?,
            Some(BinlogPosition::new("bin.000025", 250160467))
        );
        assert_eq!(
            checkpoint.parsed_status("shop").await?,
            ParsedStatus {
                schema: false,
                data: true
            }
        );

        Ok(())
    }

    #[tokio::test]
    async fn schema_pass_does_not_move_checkpoint() -> Result<(), Error> {
        let (store, bootstrapper) = bootstrapper();

        let report = bootstrapper
            .ingest(DATA.replace("table_data", "table_structure").as_bytes(), DumpPass::Schema)
            .await?;

        assert!(report.position.is_some());
        assert_eq!(
            CheckpointStore::new(Sink::new(store, "util")).read().await?,
            None
        );

        Ok(())
    }
}
