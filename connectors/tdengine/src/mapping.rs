//! Mapping of queried rows to schemaless points.

use crate::client::Column;
use crate::schemaless::{replace_placeholders, FieldValue, Point, Precision};
use chrono::DateTime;
use serde_json::Value;
use std::collections::HashMap;
use tdengine_connect_core::{ConnectorError, ConnectorResult};

/// Alias of the integer cursor column added to every extraction query
pub const CURSOR_COLUMN: &str = "tdc_cursor";

/// What a mapper knows about the rows it is handed
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub table: &'a str,
    pub partition: &'a str,
    pub columns: &'a [Column],
    pub precision: Precision,
}

/// Turns one row of an extraction query into a point
pub trait RowMapper: Send + Sync {
    /// Timestamp of the row in the database precision
    fn cursor(&self, ctx: &RowContext<'_>, row: &[Value]) -> ConnectorResult<i64>;

    fn map_row(&self, ctx: &RowContext<'_>, row: &[Value]) -> ConnectorResult<Point>;
}

/// Default mapper: tag columns become tags, every other column a field
#[derive(Debug, Clone)]
pub struct ColumnMapper {
    timestamp_column: String,
    tag_columns: Vec<String>,
    measurement_template: String,
}

impl ColumnMapper {
    pub fn new(
        timestamp_column: impl Into<String>,
        tag_columns: Vec<String>,
        measurement_template: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_column: timestamp_column.into(),
            tag_columns,
            measurement_template: measurement_template.into(),
        }
    }

    fn is_tag(&self, name: &str) -> bool {
        self.tag_columns.iter().any(|t| t.eq_ignore_ascii_case(name))
    }

    fn is_timestamp(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(CURSOR_COLUMN) || name.eq_ignore_ascii_case(&self.timestamp_column)
    }

    fn measurement(&self, ctx: &RowContext<'_>) -> String {
        let values = HashMap::from([
            ("table".to_string(), ctx.table.to_string()),
            ("partition".to_string(), ctx.partition.to_string()),
        ]);
        let name = replace_placeholders(&self.measurement_template, &values);
        if name.is_empty() {
            ctx.table.to_string()
        } else {
            name
        }
    }
}

impl RowMapper for ColumnMapper {
    fn cursor(&self, ctx: &RowContext<'_>, row: &[Value]) -> ConnectorResult<i64> {
        let index = ctx
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(CURSOR_COLUMN))
            .or_else(|| {
                ctx.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(&self.timestamp_column))
            })
            .ok_or_else(|| {
                ConnectorError::config(format!(
                    "table '{}' has no timestamp column '{}'",
                    ctx.table, self.timestamp_column
                ))
            })?;

        match row.get(index) {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                ConnectorError::fatal(format!("timestamp {} of '{}' is out of range", n, ctx.table))
            }),
            Some(Value::String(s)) => parse_timestamp(s, ctx.precision).ok_or_else(|| {
                ConnectorError::fatal(format!("unreadable timestamp '{}' in '{}'", s, ctx.table))
            }),
            other => Err(ConnectorError::fatal(format!(
                "missing timestamp in row of '{}': {:?}",
                ctx.table, other
            ))),
        }
    }

    fn map_row(&self, ctx: &RowContext<'_>, row: &[Value]) -> ConnectorResult<Point> {
        let mut point = Point::new(self.measurement(ctx));

        for (column, value) in ctx.columns.iter().zip(row) {
            if self.is_timestamp(&column.name) {
                continue;
            }
            let Some(value) = to_field_value(column, value) else {
                continue;
            };
            if self.is_tag(&column.name) {
                point.tags.push((column.name.clone(), value));
            } else {
                point.fields.push((column.name.clone(), value));
            }
        }

        let point = point.timestamp(self.cursor(ctx, row)?, ctx.precision);
        point
            .validate()
            .map_err(|reason| ConnectorError::format(format!("row of {}", ctx.table), reason))?;
        Ok(point)
    }
}

/// Convert a JSON cell according to the column type; `None` for NULL
fn to_field_value(column: &Column, value: &Value) -> Option<FieldValue> {
    if value.is_null() {
        return None;
    }

    let type_name = column.type_name.to_ascii_uppercase();
    let converted = match type_name.as_str() {
        "BOOL" => match value {
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Number(n) => n.as_i64().map(|v| FieldValue::Bool(v != 0)),
            _ => None,
        },
        "TINYINT" | "SMALLINT" | "INT" | "BIGINT" | "TINYINT UNSIGNED" | "SMALLINT UNSIGNED"
        | "INT UNSIGNED" | "BIGINT UNSIGNED" | "TIMESTAMP" => value.as_i64().map(FieldValue::Int),
        "FLOAT" | "DOUBLE" => value.as_f64().map(FieldValue::Float),
        _ => None,
    };

    // unknown types and mismatched cells fall back to the JSON shape
    Some(converted.unwrap_or_else(|| match value {
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Int(i),
            None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => FieldValue::Str(s.clone()),
        other => FieldValue::Str(other.to_string()),
    }))
}

/// RFC 3339 timestamp as an integer in `precision`
fn parse_timestamp(raw: &str, precision: Precision) -> Option<i64> {
    let dt = DateTime::parse_from_rfc3339(raw).ok()?;
    match precision {
        Precision::Millis => Some(dt.timestamp_millis()),
        Precision::Micros => Some(dt.timestamp_micros()),
        Precision::Nanos => dt.timestamp_nanos_opt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("ts", "TIMESTAMP"),
            Column::new("current", "FLOAT"),
            Column::new("voltage", "INT"),
            Column::new("ok", "BOOL"),
            Column::new("location", "VARCHAR"),
            Column::new("groupid", "INT"),
            Column::new(CURSOR_COLUMN, "BIGINT"),
        ]
    }

    fn ctx(columns: &[Column]) -> RowContext<'_> {
        RowContext {
            table: "meters",
            partition: "meters",
            columns,
            precision: Precision::Millis,
        }
    }

    #[test]
    fn test_map_row_splits_tags_and_fields() {
        let columns = columns();
        let mapper = ColumnMapper::new(
            "ts",
            vec!["location".to_string(), "groupid".to_string()],
            "{{table}}",
        );
        let row = vec![
            json!("2021-07-11T12:33:53.639Z"),
            json!(10.3),
            json!(219),
            json!(true),
            json!("California.SanFrancisco"),
            json!(2),
            json!(1626006833639i64),
        ];

        let point = mapper.map_row(&ctx(&columns), &row).unwrap();
        assert_eq!(point.measurement, "meters");
        assert_eq!(
            point.tags,
            vec![
                ("location".to_string(), FieldValue::Str("California.SanFrancisco".into())),
                ("groupid".to_string(), FieldValue::Int(2)),
            ]
        );
        assert_eq!(
            point.fields,
            vec![
                ("current".to_string(), FieldValue::Float(10.3)),
                ("voltage".to_string(), FieldValue::Int(219)),
                ("ok".to_string(), FieldValue::Bool(true)),
            ]
        );
        assert_eq!(point.timestamp, Some(1626006833639));
        assert_eq!(point.precision, Some(Precision::Millis));
    }

    #[test]
    fn test_nulls_are_dropped() {
        let columns = vec![
            Column::new(CURSOR_COLUMN, "BIGINT"),
            Column::new("a", "INT"),
            Column::new("b", "DOUBLE"),
        ];
        let mapper = ColumnMapper::new("ts", vec![], "td_{{table}}");
        let point = mapper
            .map_row(&ctx(&columns), &[json!(5), Value::Null, json!(1.5)])
            .unwrap();
        assert_eq!(point.measurement, "td_meters");
        assert_eq!(point.fields, vec![("b".to_string(), FieldValue::Float(1.5))]);

        let err = mapper
            .map_row(&ctx(&columns), &[json!(5), Value::Null, Value::Null])
            .unwrap_err();
        assert!(err.is_invalid_data());
    }

    #[test]
    fn test_cursor_falls_back_to_timestamp_string() {
        let columns = vec![Column::new("ts", "TIMESTAMP"), Column::new("v", "INT")];
        let mapper = ColumnMapper::new("ts", vec![], "{{table}}");
        let mut ctx = ctx(&columns);
        ctx.precision = Precision::Micros;

        let cursor = mapper
            .cursor(&ctx, &[json!("2021-07-11T20:33:53.639123+08:00"), json!(1)])
            .unwrap();
        assert_eq!(cursor, 1626006833639123);

        assert!(mapper.cursor(&ctx, &[Value::Null, json!(1)]).is_err());
    }

    #[test]
    fn test_empty_template_uses_table_name() {
        let columns = vec![Column::new(CURSOR_COLUMN, "BIGINT"), Column::new("v", "INT")];
        let mapper = ColumnMapper::new("ts", vec![], "{{unknown}}");
        let point = mapper.map_row(&ctx(&columns), &[json!(1), json!(2)]).unwrap();
        assert_eq!(point.measurement, "meters");
    }
}
