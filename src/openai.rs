//! OpenAI Chat Completions adapter.

use crate::agent::{
    build_prompt, classify_status, parse_model_output, parse_retry_after, Credentials,
    ExtractError, Extractor,
};
use crate::config::{AgentConfig, ConfigError};
use crate::record::{RawExtraction, Transcript};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const USER_AGENT: &str = concat!("chatsumma/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct OpenAiExtractor {
    client: Client,
    base_url: String,
    model: String,
    persona: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiExtractor {
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
        let status = response.status();
        if !status.is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            ExtractError::MalformedResponse(format!("unexpected response envelope: {}", e))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                ExtractError::MalformedResponse("response contained no message content".into())
            })?;

        parse_model_output(&content).into_result()
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

        classify_status(status, message, retry_after)
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    fn name(&self) -> &str {
        "openai"
    }

    async fn extract(
        &self,
        transcript: &Transcript,
        credentials: &Credentials,
    ) -> Result<RawExtraction, ExtractError> {
        if credentials.is_empty() {
            return Err(ExtractError::Auth("missing OpenAI API key".to_string()));
        }

        let prompt = build_prompt(transcript);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.persona,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        tracing::debug!(
            provider = "openai",
            model = %self.model,
            transcript_len = transcript.len(),
            "Sending extraction request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(credentials.expose())
            .json(&request)
            .send()
            .await?;

        Self::handle_response(response).await
    }
}
