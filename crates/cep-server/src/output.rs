//! Result output formatting for one-shot commands.

use crate::OutputFormat;
use anyhow::Result;
use lib_types::ResultEnvelope;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

/// Write an envelope to `out` in the requested format.
pub fn write_envelope<T: Serialize>(
    out: &mut impl Write,
    envelope: &ResultEnvelope<T>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(envelope)?)?;
        }
        OutputFormat::Text => match envelope {
            ResultEnvelope::Success { data } => write_value(out, &serde_json::to_value(data)?, 0)?,
            ResultEnvelope::Failure { code, message } => {
                writeln!(out, "Error (code {code}): {message}")?;
            }
        },
    }
    Ok(())
}

/// Print nested JSON as indented `key: value` lines.
fn write_value(out: &mut impl Write, value: &Value, depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                if value.is_object() || value.is_array() {
                    writeln!(out, "{indent}{key}:")?;
                    write_value(out, value, depth + 1)?;
                } else {
                    writeln!(out, "{indent}{key}: {}", scalar(value))?;
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                writeln!(out, "{indent}[{}]", i + 1)?;
                write_value(out, item, depth + 1)?;
            }
        }
        other => writeln!(out, "{indent}{}", scalar(other))?,
    }
    Ok(())
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
