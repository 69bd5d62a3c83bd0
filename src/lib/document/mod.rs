mod value;

pub use value::FieldValue;

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{BTreeMap, Iter};

/// Field name holding the identity of a document.
pub const ID_FIELD: &str = "_id";

#[macro_export]
macro_rules! document {
    () => {
        $crate::document::Document::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::document::Document::from_iter([
            $(($key.to_string(), $crate::document::FieldValue::from($value))),+
        ])
    };
}

/// Flat mapping of field name to value, stored as a single sink record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, FieldValue>);

impl Document {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(
        &mut self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: impl AsRef<str>) -> Option<&FieldValue> {
        self.0.get(field.as_ref())
    }

    pub fn remove(&mut self, field: impl AsRef<str>) -> Option<FieldValue> {
        self.0.remove(field.as_ref())
    }

    pub fn contains_field(&self, field: impl AsRef<str>) -> bool {
        self.0.contains_key(field.as_ref())
    }

    pub fn get_str(&self, field: impl AsRef<str>) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn get_i64(&self, field: impl AsRef<str>) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_i64)
    }

    pub fn get_document(&self, field: impl AsRef<str>) -> Option<&Document> {
        self.get(field).and_then(FieldValue::as_document)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, String, FieldValue> {
        self.0.iter()
    }

    /// Every field of `filter` is present in this document with an equal value.
    pub fn matches(&self, filter: &Document) -> bool {
        filter
            .iter()
            .all(|(field, value)| self.0.get(field).map_or(false, |own| own.eq(value)))
    }

    /// Builds a filter out of the listed fields, failing when one of them is absent.
    pub fn select<I, F>(&self, fields: I) -> Result<Document, Error>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<str>,
    {
        let mut filter = Document::new();

        for field in fields {
            let field = field.as_ref();
            let value = self
                .get(field)
                .ok_or_else(|| Error::MalformedDocument(format!("missing {field} field")))?;
            filter.insert(field, value.clone());
        }

        Ok(filter)
    }
}

impl FromIterator<(String, FieldValue)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(BTreeMap::from_iter(iter))
    }
}

impl IntoIterator for Document {
    type Item = (String, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a FieldValue);
    type IntoIter = Iter<'a, String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_document_by_subset_of_fields() {
        let document = document! {"id" => 9, "msg" => "x", "_id" => 1};

        assert!(document.matches(&document! {"id" => 9, "msg" => "x"}));
        assert!(document.matches(&Document::new()));
        assert!(!document.matches(&document! {"id" => 9, "msg" => "y"}));
        assert!(!document.matches(&document! {"id" => 9, "other" => "x"}));
    }

    #[test]
    fn selects_listed_fields_into_filter() {
        let document = document! {"id" => 5, "total" => 20};

        assert_eq!(document.select(["id"]).unwrap(), document! {"id" => 5});
    }

    #[test]
    fn errors_when_selected_field_is_missing() {
        let document = document! {"total" => 20};

        assert_eq!(
            document.select(["id"]).unwrap_err().to_string(),
            "Malformed document: missing id field"
        );
    }

    #[test]
    fn converts_optional_values_into_null() {
        let document = document! {"name" => None::<String>, "sku" => Some("sku1")};

        assert_eq!(document.get("name"), Some(&FieldValue::Null));
        assert_eq!(document.get_str("sku"), Some("sku1"));
    }
}
