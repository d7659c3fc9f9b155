use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat transport returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat transport response malformed: {0}")]
    Malformed(String),
    #[error("media exceeds the transport upload limit")]
    TooLarge,
    #[error("io error reading media {0}")]
    Io(#[from] std::io::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Opaque handle to a previously-sent message, used for live-editing the
/// progress message of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef(pub i64);

/// Outbound chat surface. Every call is fire-and-forget from the pipeline's
/// perspective: callers log failures and move on.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> ChatResult<MessageRef>;

    async fn edit_message(&self, chat_id: &str, message: MessageRef, text: &str)
        -> ChatResult<()>;

    /// Uploads a media file with a caption. Fails with [`ChatError::TooLarge`]
    /// when the transport rejects the payload size.
    async fn send_media(&self, chat_id: &str, file: &Path, caption: &str) -> ChatResult<()>;
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct EditMessageBody<'a> {
    chat_id: &'a str,
    message_id: i64,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TransportResponse {
    result: Option<SentMessage>,
}

/// Bot-API shaped HTTP implementation.
pub struct HttpChatTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), method)
    }

    async fn check(response: reqwest::Response) -> ChatResult<String> {
        let status = response.status();
        let body = response.text().await?;
        if status.as_u16() == 413 {
            return Err(ChatError::TooLarge);
        }
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send_message(&self, chat_id: &str, text: &str) -> ChatResult<MessageRef> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&SendMessageBody { chat_id, text })
            .send()
            .await?;
        let body = Self::check(response).await?;
        let parsed: TransportResponse = serde_json::from_str(&body)
            .map_err(|err| ChatError::Malformed(err.to_string()))?;
        let sent = parsed
            .result
            .ok_or_else(|| ChatError::Malformed("missing result.message_id".to_string()))?;
        Ok(MessageRef(sent.message_id))
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message: MessageRef,
        text: &str,
    ) -> ChatResult<()> {
        let response = self
            .client
            .post(self.method_url("editMessageText"))
            .json(&EditMessageBody {
                chat_id,
                message_id: message.0,
                text,
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn send_media(&self, chat_id: &str, file: &Path, caption: &str) -> ChatResult<()> {
        let bytes = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "media".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);
        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
