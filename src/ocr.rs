//! Text recognition for image uploads.
//!
//! [`TextRecognizer`] turns a decoded image into text. The shipped
//! implementation, [`VisionRecognizer`], sends the image as a base64 data
//! URL to a vision-capable chat-completion model and asks for a verbatim
//! transcription.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;

use crate::client::ApiClient;
use crate::config::Config;
use crate::error::{ExtractError, ServiceError};
use crate::generation::parse_completion;

const TRANSCRIBE_PROMPT: &str = "Transcribe all text visible in this image exactly as written. \
Preserve line breaks. Reply with the text only; reply with nothing if the image contains no text.";

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in an encoded image of type `mime`.
    async fn recognize(&self, image: &[u8], mime: &str) -> Result<String, ExtractError>;
}

pub fn create_recognizer(config: &Config) -> Arc<dyn TextRecognizer> {
    Arc::new(VisionRecognizer::new(config))
}

pub struct VisionRecognizer {
    client: ApiClient,
    model: String,
}

impl VisionRecognizer {
    pub fn new(config: &Config) -> Self {
        Self {
            client: ApiClient::new(&config.api),
            model: config.generation.model.clone(),
        }
    }
}

#[async_trait]
impl TextRecognizer for VisionRecognizer {
    async fn recognize(&self, image: &[u8], mime: &str) -> Result<String, ExtractError> {
        let data_url = format!("data:{};base64,{}", mime, BASE64.encode(image));
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": TRANSCRIBE_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }]
        });

        let payload = self
            .client
            .post_json("chat/completions", &body, ServiceError::GenerationFailed)
            .await
            .map_err(|e| match e {
                ServiceError::CredentialMissing(key) => ExtractError::CredentialMissing(key),
                other => ExtractError::Ocr(other.to_string()),
            })?;
        parse_completion(&payload)
            .map(|text| text.trim().to_string())
            .map_err(|e| ExtractError::Ocr(e.to_string()))
    }
}
