//! Conversion of decoded binlog values into sink values.

use crate::document::FieldValue;
use chrono::NaiveDate;
use mysql_common::binlog::value::BinlogValue;
use mysql_common::constants::ColumnType;
use mysql_common::value::Value;

pub fn normalize(value: &BinlogValue<'_>, column_type: ColumnType) -> FieldValue {
    match value {
        BinlogValue::Value(value) => normalize_value(value, column_type),
        BinlogValue::Jsonb(json) => match serde_json::Value::try_from(json.clone()) {
            Ok(json) => FieldValue::Text(json.to_string()),
            Err(_) => FieldValue::Null,
        },
        BinlogValue::JsonDiff(_) => FieldValue::Null,
    }
}

fn normalize_value(value: &Value, column_type: ColumnType) -> FieldValue {
    match value {
        Value::NULL => FieldValue::Null,
        Value::Int(value) => FieldValue::Int(*value),
        Value::UInt(value) => match i64::try_from(*value) {
            Ok(value) => FieldValue::Int(value),
            Err(_) => FieldValue::Text(value.to_string()),
        },
        Value::Float(value) => FieldValue::Float(f64::from(*value)),
        Value::Double(value) => FieldValue::Float(*value),
        Value::Bytes(bytes) => match (column_type, std::str::from_utf8(bytes)) {
            (
                ColumnType::MYSQL_TYPE_NEWDECIMAL | ColumnType::MYSQL_TYPE_DECIMAL,
                Ok(decimal),
            ) => decimal
                .parse()
                .map(FieldValue::Float)
                .unwrap_or_else(|_| FieldValue::Text(decimal.to_owned())),
            (_, Ok(text)) => FieldValue::Text(text.to_owned()),
            (_, Err(_)) => FieldValue::Bytes(bytes.clone()),
        },
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day));

            match (column_type, date) {
                (ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE, Some(date)) => {
                    FieldValue::Text(date.format("%Y-%m-%d").to_string())
                }
                (_, Some(date)) => date
                    .and_hms_micro_opt(
                        u32::from(*hour),
                        u32::from(*minute),
                        u32::from(*second),
                        *micros,
                    )
                    .map(FieldValue::DateTime)
                    .unwrap_or(FieldValue::Null),
                // zero dates have no calendar instant
                (_, None) => FieldValue::Text(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                )),
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => FieldValue::Text(
            interval_text(*negative, *days, *hours, *minutes, *seconds, *micros),
        ),
    }
}

/// Renders a duration as `H:MM:SS` with total hours and optional microseconds.
fn interval_text(negative: bool, days: u32, hours: u8, minutes: u8, seconds: u8, micros: u32) -> String {
    let sign = if negative { "-" } else { "" };
    let hours = u64::from(days) * 24 + u64::from(hours);

    match micros {
        0 => format!("{sign}{hours}:{minutes:02}:{seconds:02}"),
        micros => format!("{sign}{hours}:{minutes:02}:{seconds:02}.{micros:06}"),
    }
}
