use crate::coercion::DeclaredType;
use crate::document::{Document, FieldValue, ID_FIELD};
use crate::error::Error;
use crate::store::{collections, DocumentStore, Sink};
use std::collections::BTreeMap;
use tracing::debug;

/// Column definition as it appears in a table structure block of a dump.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnDefinition {
    pub field: String,
    pub key: String,
    pub column_type: String,
}

impl ColumnDefinition {
    pub fn new(
        field: impl Into<String>,
        key: impl Into<String>,
        column_type: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            key: key.into(),
            column_type: column_type.into(),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.key.eq_ignore_ascii_case("PRI")
    }
}

/// Primary key and column types of a single source table.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaRecord {
    db: String,
    table: String,
    primary_key: Vec<String>,
    types: BTreeMap<String, DeclaredType>,
}

impl SchemaRecord {
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            primary_key: Vec::new(),
            types: BTreeMap::new(),
        }
    }

    /// Builds the record out of column definitions, in column order.
    pub fn from_columns(
        db: impl Into<String>,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = ColumnDefinition>,
    ) -> Self {
        columns
            .into_iter()
            .fold(Self::new(db, table), |mut record, column| {
                if column.is_primary() {
                    record.primary_key.push(column.field.clone());
                }

                if let Some(declared) = DeclaredType::infer(&column.column_type) {
                    record.types.insert(column.field, declared);
                }

                record
            })
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key.push(column.into());
        self
    }

    pub fn with_type(mut self, column: impl Into<String>, declared: DeclaredType) -> Self {
        self.types.insert(column.into(), declared);
        self
    }

    pub fn id(&self) -> String {
        record_id(&self.db, &self.table)
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn types(&self) -> &BTreeMap<String, DeclaredType> {
        &self.types
    }

    pub fn column_type(&self, column: impl AsRef<str>) -> Option<DeclaredType> {
        self.types.get(column.as_ref()).copied()
    }

    fn to_document(&self) -> Document {
        let types = self
            .types
            .iter()
            .map(|(column, declared)| (column.clone(), FieldValue::from(declared.as_str())))
            .collect::<Document>();

        Document::new()
            .with(ID_FIELD, self.id())
            .with("db", self.db.as_str())
            .with("table", self.table.as_str())
            .with(
                "primary_key",
                self.primary_key
                    .iter()
                    .map(|column| FieldValue::from(column.as_str()))
                    .collect::<Vec<_>>(),
            )
            .with("types", types)
    }

    fn from_document(document: &Document) -> Result<Self, Error> {
        let malformed = |field: &str| {
            Error::MalformedDocument(format!("schema record without valid {field} field"))
        };

        let db = document.get_str("db").ok_or_else(|| malformed("db"))?;
        let table = document.get_str("table").ok_or_else(|| malformed("table"))?;

        let primary_key = match document.get("primary_key") {
            Some(FieldValue::Array(columns)) => columns
                .iter()
                .map(|column| column.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| malformed("primary_key"))?,
            None => Vec::new(),
            Some(_) => return Err(malformed("primary_key")),
        };

        let types = match document.get_document("types") {
            Some(types) => types
                .iter()
                .filter_map(|(column, declared)| {
                    declared
                        .as_str()
                        .and_then(DeclaredType::from_name)
                        .map(|declared| (column.clone(), declared))
                })
                .collect(),
            None => BTreeMap::new(),
        };

        Ok(Self {
            db: db.to_owned(),
            table: table.to_owned(),
            primary_key,
            types,
        })
    }
}

pub fn record_id(db: &str, table: &str) -> String {
    format!("{db}.{table}")
}

/// Catalog of table schemas keyed by `db.table`, kept in the sink.
#[derive(Debug, Clone)]
pub struct SchemaCatalog<S> {
    sink: Sink<S>,
}

impl<S> SchemaCatalog<S>
where
    S: DocumentStore,
{
    pub fn new(sink: Sink<S>) -> Self {
        Self { sink }
    }

    /// Inserts the record, replacing a previous record of the same table entirely.
    pub async fn put(&self, record: &SchemaRecord) -> Result<(), Error> {
        let namespace = self.sink.util_collection(collections::PRIMARY_KEYS).await?;
        let filter = Document::new().with(ID_FIELD, record.id());

        self.sink
            .store()
            .replace_one(&namespace, &filter, record.to_document(), true)
            .await?;

        Ok(())
    }

    pub async fn get(&self, db: &str, table: &str) -> Result<Option<SchemaRecord>, Error> {
        let namespace = self.sink.util_collection(collections::PRIMARY_KEYS).await?;
        debug!(db, table, "reading schema record");

        self.sink
            .store()
            .find_one(&namespace, &Document::new().with(ID_FIELD, record_id(db, table)))
            .await?
            .as_ref()
            .map(SchemaRecord::from_document)
            .transpose()
    }

    /// Primary key columns of the table, empty when none are declared or the table is unknown.
    pub async fn list_primary_key(&self, db: &str, table: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .get(db, table)
            .await?
            .map(|record| record.primary_key)
            .unwrap_or_default())
    }
}
