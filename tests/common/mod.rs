use async_trait::async_trait;
use chatsumma::record::RawExtraction;
use chatsumma::{Credentials, ExtractError, Extractor, Transcript};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Answers by transcript text; each transcript has its own queue of results.
#[derive(Default)]
pub struct ChatScript {
    replies: Mutex<HashMap<String, VecDeque<Result<RawExtraction, ExtractError>>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
    valid_key: Option<String>,
}

impl ChatScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any credentials other than `key` with an auth error.
    pub fn requiring_key(mut self, key: &str) -> Self {
        self.valid_key = Some(key.to_string());
        self
    }

    pub fn reply(self, chat: &str, result: Result<RawExtraction, ExtractError>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(chat.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn delay(mut self, chat: &str, delay: Duration) -> Self {
        self.delays.insert(chat.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for ChatScript {
    fn name(&self) -> &str {
        "script"
    }

    async fn extract(
        &self,
        transcript: &Transcript,
        credentials: &Credentials,
    ) -> Result<RawExtraction, ExtractError> {
        self.calls
            .lock()
            .unwrap()
            .push(transcript.as_str().to_string());

        if let Some(key) = &self.valid_key {
            if credentials.expose() != key {
                return Err(ExtractError::Auth("invalid API key".into()));
            }
        }

        if let Some(delay) = self.delays.get(transcript.as_str()) {
            tokio::time::sleep(*delay).await;
        }

        self.replies
            .lock()
            .unwrap()
            .get_mut(transcript.as_str())
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(ExtractError::Transient("no scripted reply".into())))
    }
}

pub fn extraction(value: Value) -> Result<RawExtraction, ExtractError> {
    match value {
        Value::Object(map) => Ok(RawExtraction::new(map)),
        other => panic!("extraction must be a JSON object, got {}", other),
    }
}

pub fn summary_of(title: &str) -> Result<RawExtraction, ExtractError> {
    extraction(json!({
        "title": title,
        "summary": format!("Summary of {}", title),
        "tags": ["chat", "test"],
        "bullets": ["first point", "second point"],
        "action_items": ["follow up"],
    }))
}
