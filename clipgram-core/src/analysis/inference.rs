use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("inference endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("inference response malformed: {0}")]
    Malformed(String),
}

/// Chat-completion-shaped request body. Visual analysis sends one text block
/// plus one image block per sampled frame; synthesis sends a single text
/// block.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrlBlock },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrlBlock {
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Validates the nested completion shape and extracts the model text.
pub(crate) fn parse_completion(body: &str) -> Result<String, InferenceError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|err| InferenceError::Malformed(format!("invalid completion payload: {err}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::Malformed("completion has no choices".to_string()))?;
    choice
        .message
        .content
        .ok_or_else(|| InferenceError::Malformed("completion choice has no content".to_string()))
}

/// Single-shot request/response inference endpoint. Two distinct model
/// identifiers ride on this one seam for the two analysis stages.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, InferenceError>;
}

pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpInferenceClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, InferenceError> {
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;
        let status = response.status();
        // The raw body is read first so failures carry the exact payload.
        let body = response.text().await?;
        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_completion(&body)
    }
}
