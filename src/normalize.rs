//! Coerces loosely-typed model output into a [`Record`].

use crate::agent::ExtractError;
use crate::record::{RawExtraction, Record};
use serde_json::Value;

/// Longest title kept, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Turn an extraction outcome into a record. Never fails.
pub fn normalize(outcome: Result<&RawExtraction, &ExtractError>) -> Record {
    match outcome {
        Ok(raw) => normalize_raw(raw),
        Err(err) => Record::failed(err.summary()),
    }
}

fn normalize_raw(raw: &RawExtraction) -> Record {
    let title: String = text_field(raw.get("title"))
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();

    Record::ok(
        title,
        text_field(raw.get("summary")),
        list_field(raw.get("tags")),
        list_field(raw.get("bullets")),
        list_field(raw.get("action_items")),
    )
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v) => stringify(v).trim().to_string(),
    }
}

fn list_field(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| stringify(item).trim().to_string())
            .collect(),
        Some(other) => vec![stringify(other).trim().to_string()],
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
