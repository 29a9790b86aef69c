//! services/api/src/adapters/ocr_llm.rs
//!
//! This module contains the adapter that reads question text out of photos.
//! It implements the `TextExtractionService` port from the `core` crate by
//! sending the image to a vision-capable chat model.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use exam_pilot_core::ports::{PortError, PortResult, TextExtractionService};
use tracing::debug;

/// Reply the model is told to give when the photo has no legible text.
const NO_TEXT_SENTINEL: &str = "NO_TEXT";

const TRANSCRIBE_INSTRUCTIONS: &str = "Transcribe all text in this image exactly as written, \
     including numbers, symbols and units. Do not solve or explain anything. \
     If the image contains no legible text, reply with NO_TEXT only.";

/// Sniffs the MIME type from the file's magic bytes.
pub fn image_mime_type(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

fn data_url(bytes: &[u8]) -> PortResult<String> {
    let mime = image_mime_type(bytes)
        .ok_or_else(|| PortError::Unexpected("Unsupported image format".to_string()))?;
    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}

fn clean_transcription(reply: &str) -> String {
    let text = reply.trim();
    if text.eq_ignore_ascii_case(NO_TEXT_SENTINEL) {
        String::new()
    } else {
        text.to_string()
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `TextExtractionService` with an OpenAI vision model.
#[derive(Clone)]
pub struct OpenAiOcrAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOcrAdapter {
    /// Creates a new `OpenAiOcrAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `TextExtractionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextExtractionService for OpenAiOcrAdapter {
    /// Returns the transcribed text, or an empty string when there is none.
    async fn extract_text(&self, image: &[u8]) -> PortResult<String> {
        let image_url = ImageUrlArgs::default()
            .url(data_url(image)?)
            .detail(ImageDetail::High)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let content = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(TRANSCRIBE_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(image_url)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![message.into()])
            .temperature(0.0)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let text = clean_transcription(&reply);
        debug!(bytes = image.len(), chars = text.len(), "Image transcribed.");
        Ok(text)
    }
}
