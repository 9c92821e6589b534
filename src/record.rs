//! Record types - the canonical per-chat output of the pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One pasted chat after batch splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript(String);

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First `max_chars` characters, with an ellipsis when cut.
    pub fn snippet(&self, max_chars: usize) -> String {
        let mut chars = self.0.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}...", head)
        } else {
            head
        }
    }
}

impl AsRef<str> for Transcript {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The shape the model is asked to produce.
///
/// Only used to render the JSON schema into the prompt; responses are read
/// loosely through [`RawExtraction`] instead.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionShape {
    /// Short, searchable title
    pub title: String,
    /// 3-5 sentence summary faithful to the chat content
    pub summary: String,
    /// Up to 8 kebab-case keywords, 1-3 words each
    pub tags: Vec<String>,
    /// 5-8 key points
    pub bullets: Vec<String>,
    /// Optional concrete next steps
    pub action_items: Vec<String>,
}

/// Unvalidated field map returned by the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExtraction {
    fields: Map<String, Value>,
}

impl RawExtraction {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl From<Map<String, Value>> for RawExtraction {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Ok,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Ok => "ok",
            RecordStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized output for one transcript.
///
/// Every field except `error_message` is defined even when extraction failed;
/// `error_message` is `Some` exactly when `status` is [`RecordStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub bullets: Vec<String>,
    pub action_items: Vec<String>,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Record {
    /// A successful record.
    pub fn ok(
        title: String,
        summary: String,
        tags: Vec<String>,
        bullets: Vec<String>,
        action_items: Vec<String>,
    ) -> Self {
        Self {
            title,
            summary,
            tags,
            bullets,
            action_items,
            status: RecordStatus::Ok,
            error_message: None,
        }
    }

    /// A failed record with empty content.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            summary: String::new(),
            tags: Vec::new(),
            bullets: Vec::new(),
            action_items: Vec::new(),
            status: RecordStatus::Failed,
            error_message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RecordStatus::Ok
    }
}

/// Records in input order, one per transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchResult {
    records: Vec<Record>,
}

impl BatchResult {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a BatchResult {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
