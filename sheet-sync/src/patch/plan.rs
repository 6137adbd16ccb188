//! Update plans loaded from JSON
//!
//! Two shapes are accepted:
//!
//! ```json
//! {"sheets": [{"sheet": "AMS NFL", "records": [{"key": "B084TRRKBY", "fields": {"FBA INV": 98}}]}]}
//! ```
//!
//! and the flat per-sheet shape, where the key sits next to the fields under
//! one of the key aliases (or `key`), one record or a list of them per sheet:
//!
//! ```json
//! {"AMS NFL": {"asin": "B084TRRKBY", "FBA INV": 98, "WIP ETA": "2024-07-01"},
//!  "AMS NBA": [{"asin": "B01LZZHGGM", "AMZ VC INV": 200}]}
//! ```

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::batch::{SheetUpdates, UpdateRecord};
use super::header::{AliasSet, normalize};
use super::value::FieldInput;
use crate::workbook::cell::format_number;

/// Records grouped by sheet, applied in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub sheets: Vec<SheetUpdates>,
}

impl UpdatePlan {
    /// Single-sheet plan
    pub fn single(sheet: impl Into<String>, records: Vec<UpdateRecord>) -> Self {
        Self {
            sheets: vec![SheetUpdates {
                sheet: sheet.into(),
                records,
            }],
        }
    }

    pub fn record_count(&self) -> usize {
        self.sheets.iter().map(|s| s.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Parse either plan shape; `key` names the aliases accepted as the key
    /// field of flat records
    pub fn from_json(text: &str, key: &AliasSet) -> Result<Self> {
        let value: Value = serde_json::from_str(text).context("Plan is not valid JSON")?;
        let Value::Object(root) = value else {
            bail!("Plan must be a JSON object");
        };

        let structured = root.len() == 1 && root.get("sheets").is_some_and(Value::is_array);
        if structured {
            return serde_json::from_value(Value::Object(root)).context("Invalid structured plan");
        }

        let mut plan = UpdatePlan::default();
        for (sheet, body) in root {
            let records = match body {
                Value::Object(fields) => vec![parse_record(&sheet, fields, key)?],
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| match item {
                        Value::Object(fields) => parse_record(&sheet, fields, key),
                        _ => bail!("Sheet '{}': record {} is not an object", sheet, i + 1),
                    })
                    .collect::<Result<Vec<_>>>()?,
                _ => bail!("Sheet '{}': expected a record or a list of records", sheet),
            };
            plan.sheets.push(SheetUpdates { sheet, records });
        }
        Ok(plan)
    }
}

/// Parse one record object, structured (`key` + `fields`) or flat
fn parse_record(sheet: &str, object: Map<String, Value>, key: &AliasSet) -> Result<UpdateRecord> {
    if object.contains_key("fields") {
        return serde_json::from_value(Value::Object(object))
            .with_context(|| format!("Sheet '{}': invalid record", sheet));
    }

    let mut record_key: Option<String> = None;
    let mut fields = BTreeMap::new();
    for (name, value) in object {
        let normalized = normalize(&name);
        if record_key.is_none() && (normalized == "KEY" || key.matches(&normalized)) {
            record_key = Some(scalar_text(&value).with_context(|| {
                format!("Sheet '{}': key field '{}' must be a string or number", sheet, name)
            })?);
            continue;
        }
        let input = field_input(&value)
            .with_context(|| format!("Sheet '{}': field '{}' has an unsupported value", sheet, name))?;
        fields.insert(name, input);
    }

    let Some(record_key) = record_key else {
        bail!("Sheet '{}': record has no key field ({} or key)", sheet, key);
    };
    Ok(UpdateRecord {
        key: record_key,
        fields,
    })
}

fn scalar_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => n
            .as_f64()
            .map(format_number)
            .context("number out of range"),
        other => bail!("unexpected {}", other),
    }
}

fn field_input(value: &Value) -> Result<FieldInput> {
    Ok(match value {
        Value::Number(n) => FieldInput::Number(n.as_f64().context("number out of range")?),
        Value::String(s) => FieldInput::Text(s.clone()),
        Value::Bool(b) => FieldInput::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Null => FieldInput::Text(String::new()),
        other => bail!("unexpected {}", other),
    })
}
