//! Gemini `generateContent` adapter.

use crate::agent::{
    build_prompt, classify_status, parse_model_output, parse_retry_after, Credentials,
    ExtractError, Extractor,
};
use crate::config::{AgentConfig, ConfigError};
use crate::record::{RawExtraction, Transcript};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const USER_AGENT: &str = concat!("chatsumma/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct GeminiExtractor {
    client: Client,
    base_url: String,
    model: String,
    persona: String,
    temperature: f32,
    max_tokens: u32,
}

impl GeminiExtractor {
    pub fn new(config: &AgentConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            persona: config.persona.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn handle_response(response: Response) -> Result<RawExtraction, ExtractError> {
        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body = response.text().await?;
        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            ExtractError::MalformedResponse(format!("unexpected response envelope: {}", e))
        })?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ExtractError::MalformedResponse(
                "response contained no candidate text".into(),
            ));
        }

        parse_model_output(&text).into_result()
    }

    async fn handle_error_response(response: Response) -> ExtractError {
        let status = response.status();
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("HTTP {}", status));

        // Gemini reports a bad key as 400 INVALID_ARGUMENT.
        if status == StatusCode::BAD_REQUEST
            && (body.contains("API_KEY_INVALID") || message.contains("API key not valid"))
        {
            return ExtractError::Auth(message);
        }

        classify_status(status, message, retry_after)
    }
}

#[async_trait]
impl Extractor for GeminiExtractor {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn extract(
        &self,
        transcript: &Transcript,
        credentials: &Credentials,
    ) -> Result<RawExtraction, ExtractError> {
        if credentials.is_empty() {
            return Err(ExtractError::Auth("missing Gemini API key".to_string()));
        }

        let prompt = build_prompt(transcript);
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &self.persona,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                response_mime_type: "application/json",
            },
        };

        tracing::debug!(
            provider = "gemini",
            model = %self.model,
            transcript_len = transcript.len(),
            "Sending extraction request"
        );

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", credentials.expose())
            .json(&request)
            .send()
            .await?;

        Self::handle_response(response).await
    }
}
