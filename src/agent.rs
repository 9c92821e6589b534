//! Extraction client seam.
//!
//! The language model is an opaque capability behind the [`Extractor`] trait.
//! Provider adapters live in [`crate::openai`] and [`crate::gemini`]; this module
//! holds what they share: credentials, the error taxonomy, the prompt and the
//! parsing of loosely-typed model output.

use crate::config::{Config, ConfigError};
use crate::record::{ExtractionShape, RawExtraction, Transcript};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Longest message kept in a failed record.
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The provider refused the request itself (unknown model, oversized input).
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ExtractError {
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Only throttling and transport failures are worth a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Transient(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short category label used in exported failure messages.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::RateLimit { .. } => "rate-limit",
            Self::Transient(_) => "transient",
            Self::MalformedResponse(_) => "malformed-response",
            Self::Rejected(_) => "rejected",
        }
    }

    /// `"<category>: <message>"`, truncated for display in a spreadsheet cell.
    pub fn summary(&self) -> String {
        let message = match self {
            Self::Auth(m)
            | Self::Transient(m)
            | Self::MalformedResponse(m)
            | Self::Rejected(m) => m,
            Self::RateLimit { message, .. } => message,
        };
        let message: String = message
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(MAX_ERROR_MESSAGE_CHARS)
            .collect();
        format!("{}: {}", self.category(), message)
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExtractError::Transient("request timed out".to_string())
        } else if err.is_connect() {
            ExtractError::Transient("connection failed".to_string())
        } else if err.is_decode() {
            ExtractError::MalformedResponse("response body could not be decoded".to_string())
        } else {
            ExtractError::Transient(err.without_url().to_string())
        }
    }
}

/// API secret for the configured provider.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(***)")
    }
}

/// A language model that turns one transcript into a field map.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Run exactly one model call for `transcript`.
    async fn extract(
        &self,
        transcript: &Transcript,
        credentials: &Credentials,
    ) -> Result<RawExtraction, ExtractError>;
}

#[async_trait]
impl<T: Extractor + ?Sized> Extractor for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn extract(
        &self,
        transcript: &Transcript,
        credentials: &Credentials,
    ) -> Result<RawExtraction, ExtractError> {
        (**self).extract(transcript, credentials).await
    }
}

/// Build the adapter for the configured provider.
pub fn build_extractor(config: &Config) -> Result<Arc<dyn Extractor>, ConfigError> {
    let extractor: Arc<dyn Extractor> = match config.agent.provider.as_str() {
        "openai" => Arc::new(crate::openai::OpenAiExtractor::new(&config.agent)?),
        "gemini" => Arc::new(crate::gemini::GeminiExtractor::new(&config.agent)?),
        other => return Err(ConfigError::UnknownProvider(other.to_string())),
    };
    tracing::debug!(provider = extractor.name(), model = %config.agent.model, "Built extractor");
    Ok(extractor)
}

/// Default system prompt for the organiser.
pub const DEFAULT_PERSONA: &str = "You are an expert organizer for AI chat transcripts. \
Return clean, concise outputs. The title must be short and searchable. \
The summary must be faithful to the chat content. \
Force tags to be 1-3 words each in kebab-case.";

/// User prompt asking for one JSON object shaped like [`ExtractionShape`].
pub fn build_prompt(transcript: &Transcript) -> String {
    let schema = schemars::schema_for!(ExtractionShape);
    let schema = serde_json::to_string_pretty(&schema).unwrap_or_default();

    format!(
        r#"Given the following chat transcript, return a single JSON object with the fields
"title", "summary", "tags", "bullets" and "action_items", matching this JSON schema:
{}

If the chat covers multiple topics, pick the dominant one.
Do not include any markdown formatting, code blocks, or explanations. Only output the raw JSON object.

Transcript:
---
{}
---"#,
        schema,
        transcript.as_str()
    )
}

/// Model text after a parse attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Parsed(RawExtraction),
    Unparseable(String),
}

impl ModelOutput {
    pub fn into_result(self) -> Result<RawExtraction, ExtractError> {
        match self {
            ModelOutput::Parsed(raw) => Ok(raw),
            ModelOutput::Unparseable(text) => {
                let preview: String = text.chars().take(80).collect();
                Err(ExtractError::MalformedResponse(format!(
                    "expected a JSON object, got: {}",
                    preview
                )))
            }
        }
    }
}

/// Read model text as a JSON object, tolerating markdown code fences.
pub fn parse_model_output(text: &str) -> ModelOutput {
    let cleaned = strip_markdown_json(text);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(fields)) => ModelOutput::Parsed(RawExtraction::new(fields)),
        _ => ModelOutput::Unparseable(text.to_string()),
    }
}

/// Strip markdown code block wrappers from JSON response
fn strip_markdown_json(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        let without_prefix = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end_idx) = without_prefix.rfind("```") {
            return without_prefix[..end_idx].trim().to_string();
        }
    }

    trimmed.to_string()
}

/// Map a non-success status to the extraction error taxonomy.
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    message: String,
    retry_after: Option<Duration>,
) -> ExtractError {
    match status.as_u16() {
        401 | 403 => ExtractError::Auth(message),
        429 => ExtractError::RateLimit {
            message,
            retry_after,
        },
        408 | 500..=599 => {
            ExtractError::Transient(format!("server error {}: {}", status.as_u16(), message))
        }
        // Any other client error fails the same way on every attempt.
        400..=499 => ExtractError::Rejected(format!("HTTP {}: {}", status.as_u16(), message)),
        _ => ExtractError::Transient(format!("HTTP {}: {}", status.as_u16(), message)),
    }
}

/// Seconds from a numeric `Retry-After` header.
pub(crate) fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
