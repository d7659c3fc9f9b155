use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::chat::{ChatError, ChatResult, ChatTransport};
use crate::config::DeliverySection;
use crate::fetcher::DownloadedArtifact;

/// Formats and chunks final text and media for the chat transport under its
/// hard per-message size cap.
pub struct ResultDelivery {
    chat: Arc<dyn ChatTransport>,
    config: DeliverySection,
}

impl ResultDelivery {
    pub fn new(chat: Arc<dyn ChatTransport>, config: DeliverySection) -> Self {
        Self { chat, config }
    }

    /// One message when it fits; otherwise a split notice followed by
    /// numbered paragraph-boundary chunks with a small inter-message delay to
    /// preserve ordering on the receiving side.
    pub async fn deliver_report(&self, chat_id: &str, title: &str, body: &str) -> ChatResult<()> {
        let header = format!("{title}\n\n");
        if header.len() + body.len() <= self.config.message_limit {
            self.chat
                .send_message(chat_id, &format!("{header}{body}"))
                .await?;
            return Ok(());
        }

        let chunks = chunk_paragraphs(body, self.config.chunk_limit);
        let total = chunks.len();
        self.chat
            .send_message(
                chat_id,
                &format!("{title}\n\nThe report is long, sending it in {total} parts."),
            )
            .await?;
        for (index, chunk) in chunks.iter().enumerate() {
            sleep(Duration::from_millis(self.config.chunk_delay_ms)).await;
            self.chat
                .send_message(chat_id, &format!("[{}/{}]\n{}", index + 1, total, chunk))
                .await?;
        }
        Ok(())
    }

    /// Direct upload below the size gate; a link-only message above it, and
    /// as fallback when the transport rejects the upload. Best-effort: never
    /// fails the pipeline.
    pub async fn deliver_file(
        &self,
        chat_id: &str,
        artifact: &DownloadedArtifact,
        caption: &str,
        link: &str,
    ) {
        let threshold = self.config.max_direct_mb * 1024 * 1024;
        if artifact.size_bytes > threshold {
            self.send_link(chat_id, caption, link).await;
            return;
        }
        match self.chat.send_media(chat_id, &artifact.path, caption).await {
            Ok(()) => {}
            Err(ChatError::TooLarge) => {
                warn!(chat = chat_id, "transport rejected media size, falling back to link");
                self.send_link(chat_id, caption, link).await;
            }
            Err(err) => {
                warn!(chat = chat_id, error = %err, "media delivery failed, falling back to link");
                self.send_link(chat_id, caption, link).await;
            }
        }
    }

    async fn send_link(&self, chat_id: &str, caption: &str, link: &str) {
        let text = format!("{caption}\n{link}");
        if let Err(err) = self.chat.send_message(chat_id, &text).await {
            warn!(chat = chat_id, error = %err, "link delivery failed");
        }
    }
}

/// Splits text into chunks at paragraph boundaries (double newline), never
/// splitting a paragraph unless that single paragraph exceeds the limit, in
/// which case it is hard-wrapped at character boundaries.
pub fn chunk_paragraphs(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in text.split("\n\n") {
        for piece in hard_wrap(paragraph, limit) {
            if current.is_empty() {
                current = piece;
            } else if current.len() + 2 + piece.len() <= limit {
                current.push_str("\n\n");
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::take(&mut current));
                current = piece;
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn hard_wrap(paragraph: &str, limit: usize) -> Vec<String> {
    if paragraph.len() <= limit {
        return vec![paragraph.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for ch in paragraph.chars() {
        if current.len() + ch.len_utf8() > limit {
            pieces.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
