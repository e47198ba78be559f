// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Column-type normalization from raw driver values to JSON-safe forms.
//!
//! Both the snapshot (text protocol) and the binlog tail (binary protocol)
//! funnel through here, so a downstream consumer sees one representation
//! per column type regardless of where the row image came from. A failed
//! conversion aborts the row with an error naming schema, table, column and
//! raw value.

use mysql_async::Value as SqlValue;
use serde_json::{Map, Value};

use riverflow_common::error::{FlowError, Result};

use super::meta::{ColumnKind, ColumnMeta, TableMeta};

/// Normalize one row image into a JSON object keyed by column name.
pub fn normalize_row(meta: &TableMeta, values: Vec<SqlValue>) -> Result<Value> {
    let mut row = Map::with_capacity(meta.columns.len());
    for (column, value) in meta.columns.iter().zip(values) {
        row.insert(column.name.clone(), normalize_value(meta, column, &value)?);
    }
    Ok(Value::Object(row))
}

pub fn normalize_value(meta: &TableMeta, column: &ColumnMeta, value: &SqlValue) -> Result<Value> {
    if matches!(value, SqlValue::NULL) {
        return Ok(Value::Null);
    }
    match column.kind {
        ColumnKind::Integer => {
            if column.unsigned {
                to_u64(value)
                    .map(Value::from)
                    .ok_or_else(|| schema_error(meta, column, value, "unsigned integer"))
            } else {
                to_i64(value)
                    .map(Value::from)
                    .ok_or_else(|| schema_error(meta, column, value, "signed integer"))
            }
        }
        ColumnKind::Float => match value {
            SqlValue::Float(f) => Ok(Value::from(*f as f64)),
            SqlValue::Double(d) => Ok(Value::from(*d)),
            SqlValue::Bytes(b) => Ok(Value::from(lossy(b))),
            _ => Err(schema_error(meta, column, value, "float")),
        },
        ColumnKind::Enum | ColumnKind::Set | ColumnKind::Decimal => match value {
            SqlValue::Bytes(b) => Ok(Value::from(lossy(b))),
            SqlValue::Int(i) => Ok(Value::from(i.to_string())),
            SqlValue::UInt(u) => Ok(Value::from(u.to_string())),
            _ => Err(schema_error(meta, column, value, "string")),
        },
        ColumnKind::DateTime => match value {
            SqlValue::Bytes(b) => Ok(Value::from(lossy(b))),
            SqlValue::Date(..) | SqlValue::Time(..) => Ok(Value::from(format_temporal(value))),
            _ => Err(schema_error(meta, column, value, "datetime")),
        },
        ColumnKind::Bit => match value {
            SqlValue::Bytes(b) if b.len() == 1 => Ok(Value::from(b[0] != 0)),
            SqlValue::Bytes(b) => Ok(Value::Array(
                b.iter().map(|byte| Value::from(*byte)).collect(),
            )),
            SqlValue::Int(i) => Ok(Value::from(*i != 0)),
            SqlValue::UInt(u) => Ok(Value::from(*u != 0)),
            _ => Err(schema_error(meta, column, value, "bit")),
        },
        ColumnKind::Json | ColumnKind::Text => match value {
            SqlValue::Bytes(b) => Ok(Value::from(lossy(b))),
            _ => Err(schema_error(meta, column, value, "string")),
        },
        ColumnKind::Unknown => Ok(Value::from(stringify(value))),
    }
}

fn to_u64(value: &SqlValue) -> Option<u64> {
    match value {
        SqlValue::Int(i) => Some(*i as u64),
        SqlValue::UInt(u) => Some(*u),
        SqlValue::Bytes(b) => be_uint(b),
        _ => None,
    }
}

fn to_i64(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Int(i) => Some(*i),
        SqlValue::UInt(u) => Some(*u as i64),
        SqlValue::Bytes(b) => be_uint(b).map(|u| u as i64),
        _ => None,
    }
}

/// Big-endian integer from a byte slice of at most 8 bytes, zero-padded on
/// the left. An empty slice yields 0.
fn be_uint(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    Some(u64::from_be_bytes(buf))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn format_temporal(value: &SqlValue) -> String {
    match value {
        SqlValue::Date(year, month, day, 0, 0, 0, 0) => {
            format!("{year:04}-{month:02}-{day:02}")
        }
        SqlValue::Date(year, month, day, hour, minute, second, 0) => {
            format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
        }
        SqlValue::Date(year, month, day, hour, minute, second, micros) => format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        ),
        SqlValue::Time(negative, days, hours, minutes, seconds, 0) => {
            let sign = if *negative { "-" } else { "" };
            format!(
                "{sign}{:02}:{minutes:02}:{seconds:02}",
                u32::from(*hours) + days * 24
            )
        }
        SqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            format!(
                "{sign}{:02}:{minutes:02}:{seconds:02}.{micros:06}",
                u32::from(*hours) + days * 24
            )
        }
        _ => stringify(value),
    }
}

fn stringify(value: &SqlValue) -> String {
    match value {
        SqlValue::Bytes(b) => lossy(b),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::UInt(u) => u.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Double(d) => d.to_string(),
        other => format!("{other:?}"),
    }
}

fn schema_error(meta: &TableMeta, column: &ColumnMeta, value: &SqlValue, want: &str) -> FlowError {
    FlowError::Schema {
        schema: meta.schema.clone(),
        table: meta.name.clone(),
        column: column.name.clone(),
        value: format!("{value:?}"),
        reason: format!("unsupported source value for {want} column"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn table(columns: Vec<ColumnMeta>) -> TableMeta {
        TableMeta {
            schema: "db".into(),
            name: "t".into(),
            columns,
        }
    }

    fn column(name: &str, kind: ColumnKind, unsigned: bool) -> ColumnMeta {
        ColumnMeta {
            name: name.into(),
            kind,
            unsigned,
        }
    }

    #[test]
    fn test_integer_forms() {
        let meta = table(vec![
            column("u", ColumnKind::Integer, true),
            column("i", ColumnKind::Integer, false),
        ]);
        let row = normalize_row(
            &meta,
            vec![SqlValue::Bytes(vec![0x01, 0x00]), SqlValue::Int(-7)],
        )
        .unwrap();
        assert_eq!(row, json!({"u": 256, "i": -7}));
    }

    #[test]
    fn test_empty_bytes_boundaries() {
        let meta = table(vec![
            column("n", ColumnKind::Integer, false),
            column("s", ColumnKind::Text, false),
        ]);
        let row = normalize_row(
            &meta,
            vec![SqlValue::Bytes(vec![]), SqlValue::Bytes(vec![])],
        )
        .unwrap();
        assert_eq!(row, json!({"n": 0, "s": ""}));
    }

    #[test]
    fn test_oversized_integer_bytes_fail_with_context() {
        let meta = table(vec![column("n", ColumnKind::Integer, true)]);
        let err = normalize_row(&meta, vec![SqlValue::Bytes(vec![1; 9])]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("db.t"), "{message}");
        assert!(message.contains("column n"), "{message}");
    }

    #[test]
    fn test_bit_column() {
        let meta = table(vec![
            column("flag", ColumnKind::Bit, false),
            column("mask", ColumnKind::Bit, false),
        ]);
        let row = normalize_row(
            &meta,
            vec![SqlValue::Bytes(vec![1]), SqlValue::Bytes(vec![1, 2])],
        )
        .unwrap();
        assert_eq!(row, json!({"flag": true, "mask": [1, 2]}));
    }

    #[test]
    fn test_null_and_float_and_datetime() {
        let meta = table(vec![
            column("a", ColumnKind::Float, false),
            column("b", ColumnKind::DateTime, false),
            column("c", ColumnKind::Text, false),
        ]);
        let row = normalize_row(
            &meta,
            vec![
                SqlValue::Double(1.5),
                SqlValue::Date(2024, 5, 1, 12, 30, 0, 0),
                SqlValue::NULL,
            ],
        )
        .unwrap();
        assert_eq!(row, json!({"a": 1.5, "b": "2024-05-01 12:30:00", "c": null}));
    }

    #[test]
    fn test_unknown_kind_is_stringified() {
        let meta = table(vec![column("g", ColumnKind::Unknown, false)]);
        let row = normalize_row(&meta, vec![SqlValue::Int(42)]).unwrap();
        assert_eq!(row, json!({"g": "42"}));
    }
}
