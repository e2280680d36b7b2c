use serde_json::{Map, Value};

use super::models::{Document, FieldRecord};

/// Field type assumed for records written before `fieldType` existed.
pub const DEFAULT_FIELD_TYPE: &str = "text";

/// Result of walking a raw JSON document.
#[derive(Debug, Default)]
pub struct Cleaned {
    /// Every well-formed record, invalid ones left out.
    pub document: Document,
    /// One message per defect found.
    pub errors: Vec<String>,
}

impl Cleaned {
    pub fn has_defects(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Walks `raw` and keeps only well-formed records.
///
/// Returns `Err` when the top level is not an object; the caller treats that
/// the same as unparsable content.
pub fn clean(raw: &Value) -> Result<Cleaned, String> {
    let Value::Object(elements) = raw else {
        return Err(format!("top level is {}, expected an object", kind(raw)));
    };

    let mut cleaned = Cleaned::default();
    for (element_id, fields) in elements {
        let Value::Object(fields) = fields else {
            cleaned
                .errors
                .push(format!("Invalid entry for element {element_id}: not an object"));
            continue;
        };

        // An element whose records are all invalid stays as an empty entry.
        cleaned.document.ensure_element(element_id);

        for (field_name, data) in fields {
            match record_from_value(data) {
                Ok((record, note)) => {
                    if let Some(note) = note {
                        cleaned
                            .errors
                            .push(format!("{element_id}.{field_name}: {note}"));
                    }
                    cleaned.document.upsert(element_id, field_name, record);
                }
                Err(reason) => cleaned
                    .errors
                    .push(format!("Invalid field {element_id}.{field_name}: {reason}")),
            }
        }
    }

    Ok(cleaned)
}

/// Strict conversion: `value`, `timestamp` and `generated` must be present and
/// correctly typed. A missing `fieldType` is filled in and reported through the
/// returned note; a mistyped one rejects the record.
fn record_from_value(data: &Value) -> Result<(FieldRecord, Option<String>), String> {
    let Value::Object(map) = data else {
        return Err("not an object".into());
    };

    let value = string_field(map, "value")?;
    let timestamp = string_field(map, "timestamp")?;
    let generated = match map.get("generated") {
        Some(Value::Bool(flag)) => *flag,
        Some(other) => return Err(format!("`generated` is {}, expected a boolean", kind(other))),
        None => return Err("missing `generated`".into()),
    };

    let (field_type, note) = match map.get("fieldType") {
        Some(Value::String(field_type)) => (field_type.clone(), None),
        Some(other) => return Err(format!("`fieldType` is {}, expected a string", kind(other))),
        None => (
            DEFAULT_FIELD_TYPE.to_string(),
            Some(format!("missing `fieldType`, set to \"{DEFAULT_FIELD_TYPE}\"")),
        ),
    };

    let record = FieldRecord {
        value,
        timestamp,
        generated,
        field_type,
    };
    Ok((record, note))
}

fn string_field(map: &Map<String, Value>, key: &str) -> Result<String, String> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("`{key}` is {}, expected a string", kind(other))),
        None => Err(format!("missing `{key}`")),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
