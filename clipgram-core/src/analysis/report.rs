use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::error::{AnalysisError, AnalysisResult};
use super::inference::{
    ChatMessage, ChatRequest, ContentBlock, ImageUrlBlock, InferenceClient,
};

const VISUAL_PROMPT: &str = "You are a short-form video analyst. The attached images are frames \
sampled from one video in chronological order: the opening seconds are sampled densely, the rest \
sparsely. Describe the visual narrative as unstructured prose: the setting, people and objects, \
on-screen text and captions, camera work and cuts, pacing, and especially what happens in the \
opening seconds that would stop a viewer from scrolling. Do not speculate about audio.";

/// Sends the sampled frames to a vision-capable model and returns its
/// unstructured narrative text.
pub struct VisualAnalyzer {
    client: Arc<dyn InferenceClient>,
    model: String,
    max_tokens: u32,
}

impl VisualAnalyzer {
    pub fn new(client: Arc<dyn InferenceClient>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
        }
    }

    pub async fn analyze(&self, frames: &[PathBuf]) -> AnalysisResult<String> {
        let mut content = vec![ContentBlock::Text {
            text: VISUAL_PROMPT.to_string(),
        }];
        for frame in frames {
            let bytes = tokio::fs::read(frame)
                .await
                .map_err(|source| AnalysisError::Io {
                    source,
                    path: frame.clone(),
                })?;
            content.push(ContentBlock::ImageUrl {
                image_url: ImageUrlBlock {
                    url: format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)),
                },
            });
        }
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
        };
        Ok(self.client.complete(request).await?)
    }
}

/// Combines the visual narrative and the transcript into one structured
/// report. The output format is constrained only by prompt instruction; the
/// text is delivered as-is.
pub struct StrategySynthesizer {
    client: Arc<dyn InferenceClient>,
    model: String,
    max_tokens: u32,
}

impl StrategySynthesizer {
    pub fn new(client: Arc<dyn InferenceClient>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
        }
    }

    pub async fn synthesize(
        &self,
        narrative: &str,
        transcript: &str,
        duration_seconds: f64,
        title: &str,
    ) -> AnalysisResult<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![ContentBlock::Text {
                    text: synthesis_prompt(narrative, transcript, duration_seconds, title),
                }],
            }],
        };
        Ok(self.client.complete(request).await?)
    }
}

pub(crate) fn synthesis_prompt(
    narrative: &str,
    transcript: &str,
    duration_seconds: f64,
    title: &str,
) -> String {
    format!(
        "You are a content strategist reviewing one published video. Write a report of roughly \
500 to 700 words, split into paragraphs, with the section headers *Hook*, *Story*, *Audio*, \
*Strengths*, *Improvements* and *Repurposing ideas* in that order. Use *asterisks* for emphasis \
and keep each section self-contained.\n\n\
Title: {title}\n\
Duration: {duration_seconds:.0} seconds\n\n\
Visual narrative:\n{narrative}\n\n\
Transcript:\n{transcript}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_prompt_embeds_inputs_verbatim() {
        let prompt = synthesis_prompt(
            "a skater lands a trick",
            "[No audio detected]",
            45.0,
            "Kickflip tutorial",
        );
        assert!(prompt.contains("a skater lands a trick"));
        assert!(prompt.contains("[No audio detected]"));
        assert!(prompt.contains("Kickflip tutorial"));
        assert!(prompt.contains("Duration: 45 seconds"));
        assert!(prompt.contains("*Hook*"));
    }
}
