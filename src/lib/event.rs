use crate::document::{Document, FieldValue};
use crate::error::Error;

/// Row image change, each kind carries exactly the images it needs.
#[derive(Clone, Debug, PartialEq)]
pub enum RowChange {
    Insert(Document),
    Update { before: Document, after: Document },
    Delete(Document),
}

impl RowChange {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update { .. } => "update",
            Self::Delete(_) => "delete",
        }
    }

    /// Stored representation of the row images.
    pub fn values(&self) -> Document {
        match self {
            Self::Insert(values) | Self::Delete(values) => values.clone(),
            Self::Update { before, after } => Document::new()
                .with("before", before.clone())
                .with("after", after.clone()),
        }
    }

    pub fn from_values(kind: &str, values: Document) -> Result<Self, Error> {
        Ok(match kind {
            "insert" => Self::Insert(values),
            "delete" => Self::Delete(values),
            "update" => {
                let mut values = values;
                let mut image = |name| match values.remove(name) {
                    Some(FieldValue::Document(image)) => Ok(image),
                    _ => Err(Error::MalformedDocument(format!(
                        "update event is missing {name} image"
                    ))),
                };

                let before = image("before")?;
                let after = image("after")?;
                Self::Update { before, after }
            }
            kind => {
                return Err(Error::MalformedDocument(format!(
                    "unknown event type {kind}"
                )))
            }
        })
    }
}

/// Row change observed on a source table.
#[derive(Clone, Debug, PartialEq)]
pub struct RowMutation {
    pub schema: String,
    pub table: String,
    pub change: RowChange,
}

impl RowMutation {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, change: RowChange) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            change,
        }
    }

    pub fn insert(schema: impl Into<String>, table: impl Into<String>, values: Document) -> Self {
        Self::new(schema, table, RowChange::Insert(values))
    }

    pub fn update(
        schema: impl Into<String>,
        table: impl Into<String>,
        before: Document,
        after: Document,
    ) -> Self {
        Self::new(schema, table, RowChange::Update { before, after })
    }

    pub fn delete(schema: impl Into<String>, table: impl Into<String>, values: Document) -> Self {
        Self::new(schema, table, RowChange::Delete(values))
    }
}
