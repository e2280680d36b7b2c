use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Separator the editor integration places between an element id and the
/// field it is scoped to.
pub const FIELD_SCOPE_SEPARATOR: &str = "_custom_";

/// One generated (or human-edited) value for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord {
    pub value: String,
    /// ISO-8601 UTC with millisecond precision; the only change-detection signal.
    pub timestamp: String,
    pub generated: bool,
    pub field_type: String,
}

impl FieldRecord {
    /// A record produced by the generation service, stamped now.
    pub fn generated(value: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            timestamp: now_timestamp(),
            generated: true,
            field_type: field_type.into(),
        }
    }

    /// A human edit recorded through the same store.
    pub fn edited(value: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            generated: false,
            ..Self::generated(value, field_type)
        }
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub type ElementFields = BTreeMap<String, FieldRecord>;

/// Full store contents: element id -> field name -> record.
///
/// Backed by ordered maps so the pretty-printed file has a stable key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    elements: BTreeMap<String, ElementFields>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.elements.values().map(BTreeMap::len).sum()
    }

    pub fn get(&self, element_id: &str, field_name: &str) -> Option<&FieldRecord> {
        self.elements.get(element_id)?.get(field_name)
    }

    pub fn element(&self, element_id: &str) -> Option<&ElementFields> {
        self.elements.get(element_id)
    }

    /// Full replacement of one record; creates the element entry when absent.
    pub fn upsert(&mut self, element_id: &str, field_name: &str, record: FieldRecord) {
        self.elements
            .entry(element_id.to_string())
            .or_default()
            .insert(field_name.to_string(), record);
    }

    pub(crate) fn ensure_element(&mut self, element_id: &str) -> &mut ElementFields {
        self.elements.entry(element_id.to_string()).or_default()
    }

    pub fn elements(&self) -> impl Iterator<Item = (&String, &ElementFields)> {
        self.elements.iter()
    }

    /// Every record as `(element_id, field_name, record)`.
    pub fn records(&self) -> impl Iterator<Item = (&str, &str, &FieldRecord)> {
        self.elements.iter().flat_map(|(element_id, fields)| {
            fields
                .iter()
                .map(move |(field_name, record)| (element_id.as_str(), field_name.as_str(), record))
        })
    }

    /// Largest timestamp over all records, `None` for an empty document.
    pub fn latest_timestamp(&self) -> Option<&str> {
        self.records()
            .map(|(_, _, record)| record.timestamp.as_str())
            .max()
    }

    /// Records whose element id strips down to `base_id`, for binders that key
    /// their live state by the unscoped element id.
    pub fn records_for_base(&self, base_id: &str) -> Vec<(&str, &str, &FieldRecord)> {
        self.records()
            .filter(|(element_id, _, _)| ElementKey::base(element_id) == base_id)
            .collect()
    }
}

/// Helpers for element ids scoped per field (`<element>_custom_<field>`).
pub struct ElementKey;

impl ElementKey {
    pub fn scoped(element_id: &str, field_name: &str) -> String {
        format!("{element_id}{FIELD_SCOPE_SEPARATOR}{field_name}")
    }

    /// Strips a field scope, returning the id of the owning element.
    pub fn base(element_id: &str) -> &str {
        element_id
            .split_once(FIELD_SCOPE_SEPARATOR)
            .map(|(base, _)| base)
            .unwrap_or(element_id)
    }

    pub fn is_scoped_to(element_id: &str, field_name: &str) -> bool {
        element_id
            .split_once(FIELD_SCOPE_SEPARATOR)
            .is_some_and(|(_, field)| field == field_name)
    }
}
