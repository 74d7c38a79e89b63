//! Row gate: turns loosely typed spreadsheet records into validated work items.
//!
//! Normalization happens before schema checking: textual boolean flags are
//! compared case-insensitively against a truthy token, and numeric text in
//! configured numeric columns becomes a JSON number. A record without the key
//! field is rejected before the schema is consulted.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::schema::SchemaValidator;

/// A row as read from the sheet: header name → cell value.
pub type RawRecord = Map<String, Value>;

/// A validated, uniquely keyed unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub key: String,
    pub payload: Map<String, Value>,
}

/// Normalization rules applied to every record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRules {
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_boolean_fields")]
    pub boolean_fields: Vec<String>,
    #[serde(default)]
    pub numeric_fields: Vec<String>,
    #[serde(default = "default_truthy_token")]
    pub truthy_token: String,
}

fn default_key_field() -> String {
    "sku".to_string()
}

fn default_boolean_fields() -> Vec<String> {
    vec!["is_active".to_string()]
}

fn default_truthy_token() -> String {
    "TRUE".to_string()
}

impl Default for GateRules {
    fn default() -> Self {
        Self {
            key_field: default_key_field(),
            boolean_fields: default_boolean_fields(),
            numeric_fields: Vec::new(),
            truthy_token: default_truthy_token(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    MissingKey,
    DuplicateKey,
    Schema(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingKey => write!(f, "missing key field"),
            RejectReason::DuplicateKey => write!(f, "duplicate key"),
            RejectReason::Schema(reason) => write!(f, "schema violation: {reason}"),
        }
    }
}

/// A record that did not become a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// 1-based position among data rows.
    pub row: usize,
    pub key: Option<String>,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default)]
pub struct GateResult {
    pub valid: Vec<WorkItem>,
    pub rejections: Vec<Rejection>,
}

impl GateResult {
    pub fn invalid_count(&self) -> usize {
        self.rejections.len()
    }
}

/// Coerce configured boolean and numeric fields in place.
pub fn normalize(record: &mut RawRecord, rules: &GateRules) {
    for field in &rules.boolean_fields {
        if let Some(value) = record.get_mut(field) {
            let flag = match &*value {
                Value::Bool(b) => *b,
                Value::String(s) => s.trim().eq_ignore_ascii_case(&rules.truthy_token),
                Value::Null => false,
                other => other.to_string().eq_ignore_ascii_case(&rules.truthy_token),
            };
            *value = Value::Bool(flag);
        }
    }
    for field in &rules.numeric_fields {
        if let Some(value) = record.get_mut(field)
            && let Some(number) = value.as_str().and_then(|s| parse_number(s.trim()))
        {
            *value = Value::Number(number);
        }
    }
}

fn parse_number(text: &str) -> Option<Number> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Number::from(i));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

fn extract_key(record: &RawRecord, key_field: &str) -> Option<String> {
    match record.get(key_field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Validate one record. Pure apart from logging.
pub fn validate(
    mut record: RawRecord,
    schema: &impl SchemaValidator,
    rules: &GateRules,
) -> Result<WorkItem, RejectReason> {
    let key = extract_key(&record, &rules.key_field).ok_or(RejectReason::MissingKey)?;
    normalize(&mut record, rules);
    // The key is stored trimmed so deduplication sees one spelling.
    record.insert(rules.key_field.clone(), Value::String(key.clone()));

    schema
        .validate(&Value::Object(record.clone()))
        .map_err(RejectReason::Schema)?;
    Ok(WorkItem {
        key,
        payload: record,
    })
}

/// Run every record through the gate, rejecting repeated keys.
pub fn gate_rows(
    records: Vec<RawRecord>,
    schema: &impl SchemaValidator,
    rules: &GateRules,
) -> GateResult {
    let mut result = GateResult::default();
    let mut seen = HashSet::new();

    for (index, record) in records.into_iter().enumerate() {
        let row = index + 1;
        let key = extract_key(&record, &rules.key_field);
        let outcome = match &key {
            Some(k) if seen.contains(k) => Err(RejectReason::DuplicateKey),
            _ => validate(record, schema, rules),
        };
        match outcome {
            Ok(item) => {
                debug!(row, key = %item.key, "row accepted");
                seen.insert(item.key.clone());
                result.valid.push(item);
            }
            Err(reason) => {
                warn!(row, key = ?key, reason = %reason, "row rejected");
                result.rejections.push(Rejection { row, key, reason });
            }
        }
    }

    result
}
