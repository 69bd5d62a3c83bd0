//! Conversion of textual source values into sink values.
//!
//! Both the dump bootstrap and the bulk loader route every value through
//! [`coerce`], so a column lands in the sink with the same representation
//! no matter which path wrote it.

use crate::document::{Document, FieldValue};
use crate::error::Error;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATETIME_FRACTION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Column type family recognised from a source column definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    Int,
    DateTime,
    Decimal,
    Float,
    Time,
    Blob,
}

/// Substring markers in priority order, first match wins.
const TYPE_MARKERS: [(&str, DeclaredType); 6] = [
    ("int", DeclaredType::Int),
    ("datetime", DeclaredType::DateTime),
    ("decimal", DeclaredType::Decimal),
    ("longblob", DeclaredType::Blob),
    ("float", DeclaredType::Float),
    ("time", DeclaredType::Time),
];

impl DeclaredType {
    /// Infers the type family from a column definition such as `int(11) unsigned`.
    pub fn infer(column_definition: impl AsRef<str>) -> Option<Self> {
        let definition = column_definition.as_ref().to_ascii_lowercase();

        TYPE_MARKERS
            .iter()
            .find(|(marker, _)| definition.contains(marker))
            .map(|(_, declared)| *declared)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::DateTime => "datetime",
            Self::Decimal => "decimal",
            Self::Float => "float",
            Self::Time => "time",
            Self::Blob => "blob",
        }
    }

    pub fn from_name(name: impl AsRef<str>) -> Option<Self> {
        Some(match name.as_ref() {
            "int" => Self::Int,
            "datetime" => Self::DateTime,
            "decimal" => Self::Decimal,
            "float" => Self::Float,
            "time" => Self::Time,
            "blob" | "longblob" => Self::Blob,
            _ => return None,
        })
    }
}

/// Coerces a raw textual value of `column` into the sink representation.
///
/// Absent and empty values are returned unchanged, unknown types pass through.
pub fn coerce(
    column: &str,
    raw: Option<&str>,
    declared: Option<DeclaredType>,
) -> Result<FieldValue, Error> {
    let raw = match raw {
        None => return Ok(FieldValue::Null),
        Some("") => return Ok(FieldValue::Text(String::new())),
        Some(raw) => raw,
    };

    let declared = match declared {
        Some(declared) => declared,
        None => return Ok(FieldValue::Text(raw.to_owned())),
    };

    let failure = || Error::Coercion {
        column: column.to_owned(),
        value: raw.to_owned(),
        target: declared.as_str(),
    };

    Ok(match declared {
        DeclaredType::Int => match raw.trim().parse::<i64>() {
            Ok(value) => FieldValue::Int(value),
            // unsigned values above the signed range are kept as text
            Err(_) => match raw.trim().parse::<u64>() {
                Ok(value) => FieldValue::Text(value.to_string()),
                Err(_) => return Err(failure()),
            },
        },
        DeclaredType::DateTime => FieldValue::DateTime(
            NaiveDateTime::parse_from_str(raw.trim(), DATETIME_FORMAT)
                .or_else(|_| NaiveDateTime::parse_from_str(raw.trim(), DATETIME_FRACTION_FORMAT))
                .map_err(|_| failure())?,
        ),
        DeclaredType::Decimal | DeclaredType::Float => {
            FieldValue::Float(raw.trim().parse().map_err(|_| failure())?)
        }
        DeclaredType::Time => FieldValue::Text(strip_zero_hour(raw).to_owned()),
        // TODO: decode blob payloads once the sink has a binary representation for them
        DeclaredType::Blob => FieldValue::Text(raw.to_owned()),
    })
}

/// Coerces a whole row, using `types` for the declared type of each field.
pub fn coerce_row(
    fields: impl IntoIterator<Item = (String, Option<String>)>,
    types: &BTreeMap<String, DeclaredType>,
) -> Result<Document, Error> {
    let mut document = Document::new();

    for (field, raw) in fields {
        let value = coerce(&field, raw.as_deref(), types.get(&field).copied())?;
        document.insert(field, value);
    }

    Ok(document)
}

fn strip_zero_hour(raw: &str) -> &str {
    let bytes = raw.as_bytes();

    match (bytes.first(), bytes.get(1)) {
        (Some(b'0'), Some(next)) if next.is_ascii_digit() => &raw[1..],
        _ => raw,
    }
}
