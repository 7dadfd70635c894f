//! Text-to-speech for answers.
//!
//! Calls `POST /audio/speech` on the OpenAI-compatible API and returns the
//! MP3 bytes. Playback is left to the caller.

use async_trait::async_trait;
use std::sync::Arc;

use crate::client::ApiClient;
use crate::config::Config;
use crate::error::ServiceError;

pub const AUDIO_MIME: &str = "audio/mpeg";

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError>;
}

pub fn create_synthesizer(config: &Config) -> Arc<dyn SpeechSynthesizer> {
    Arc::new(OpenAiSpeech::new(config))
}

pub struct OpenAiSpeech {
    client: ApiClient,
    model: String,
    voice: String,
}

impl OpenAiSpeech {
    pub fn new(config: &Config) -> Self {
        Self {
            client: ApiClient::new(&config.api),
            model: config.speech.model.clone(),
            voice: config.speech.voice.clone(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::SpeechFailed("nothing to speak".to_string()));
        }
        let body = serde_json::json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": "mp3",
        });
        let response = self
            .client
            .post("audio/speech", &body, ServiceError::SpeechFailed)
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::SpeechFailed(e.to_string()))?;
        tracing::debug!(bytes = bytes.len(), "synthesized speech");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_text_is_rejected_locally() {
        let speech = OpenAiSpeech::new(&Config::minimal());
        let err = speech.synthesize("  ").await.unwrap_err();
        assert!(matches!(err, ServiceError::SpeechFailed(_)));
    }
}
