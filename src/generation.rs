//! Chat-completion provider abstraction.
//!
//! [`Generator`] is the seam between the conversation engine and the hosted
//! language model. [`OpenAiGenerator`] calls `POST /chat/completions` on an
//! OpenAI-compatible API; tests substitute scripted generators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::client::ApiClient;
use crate::config::Config;
use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    /// Produce the assistant reply for `messages`. Called once, never retried.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError>;
}

pub fn create_generator(config: &Config) -> Arc<dyn Generator> {
    Arc::new(OpenAiGenerator::new(config))
}

pub struct OpenAiGenerator {
    client: ApiClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &Config) -> Self {
        Self {
            client: ApiClient::new(&config.api),
            model: config.generation.model.clone(),
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        });

        let payload = self
            .client
            .post_json("chat/completions", &body, ServiceError::GenerationFailed)
            .await?;
        parse_completion(&payload)
    }
}

/// Pull `choices[0].message.content` out of a completion response.
pub(crate) fn parse_completion(payload: &serde_json::Value) -> Result<String, ServiceError> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ServiceError::GenerationFailed("response has no message content".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_in_wire_format() {
        let json = serde_json::to_value(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ])
        .unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[2]["role"], "assistant");
        assert_eq!(json[2]["content"], "hello");
    }

    #[test]
    fn parse_completion_reads_first_choice() {
        let payload = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Paris." } }]
        });
        assert_eq!(parse_completion(&payload).unwrap(), "Paris.");
    }

    #[test]
    fn parse_completion_rejects_missing_content() {
        let err = parse_completion(&serde_json::json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, ServiceError::GenerationFailed(_)));
    }
}
