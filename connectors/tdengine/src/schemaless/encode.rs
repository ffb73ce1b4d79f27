use super::{FieldValue, Point};
use std::fmt::Write;
use tdengine_connect_core::{ConnectorError, ConnectorResult};

/// Encode a point as one schemaless line
pub fn encode(point: &Point) -> ConnectorResult<String> {
    point
        .validate()
        .map_err(|reason| ConnectorError::format(&point.measurement, reason))?;

    let mut line = String::with_capacity(64);
    push_name(&mut line, &point.measurement, point)?;

    for (key, value) in &point.tags {
        line.push(',');
        push_name(&mut line, key, point)?;
        line.push('=');
        push_value(&mut line, key, value, point)?;
    }

    line.push(' ');
    for (i, (key, value)) in point.fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        push_name(&mut line, key, point)?;
        line.push('=');
        push_value(&mut line, key, value, point)?;
    }

    if let Some(ts) = point.timestamp {
        let _ = write!(line, " {}", ts);
    }

    Ok(line)
}

fn reject_newlines(text: &str, point: &Point) -> ConnectorResult<()> {
    if text.contains(&['\n', '\r'][..]) {
        return Err(ConnectorError::format(
            &point.measurement,
            format!("line breaks are not allowed in '{}'", text.escape_debug()),
        ));
    }
    Ok(())
}

/// Measurement names and keys: backslash-escape separators
fn push_name(out: &mut String, name: &str, point: &Point) -> ConnectorResult<()> {
    reject_newlines(name, point)?;
    for c in name.chars() {
        if matches!(c, ',' | '=' | ' ' | '\t' | '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    Ok(())
}

fn push_value(out: &mut String, key: &str, value: &FieldValue, point: &Point) -> ConnectorResult<()> {
    match value {
        FieldValue::Int(v) => {
            let _ = write!(out, "{}i64", v);
        }
        FieldValue::Float(v) => {
            if !v.is_finite() {
                return Err(ConnectorError::format(
                    &point.measurement,
                    format!("non-finite float for '{}'", key),
                ));
            }
            let _ = write!(out, "{}f64", v);
        }
        FieldValue::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
        FieldValue::Str(v) => {
            reject_newlines(v, point)?;
            out.push_str("L\"");
            for c in v.chars() {
                if matches!(c, '"' | '\\') {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
    }
    Ok(())
}
