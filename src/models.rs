//! Core data models used throughout docqa.
//!
//! These types represent the uploads, chunks, conversation turns and
//! feedback records that flow through the ingestion and question-answering
//! pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded file: raw bytes plus the declared content type.
///
/// Consumed by the extractor and discarded once its text is known.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// A document that produced no text, and why.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub name: String,
    pub reason: String,
}

/// A bounded, overlapping slice of the concatenated document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Position in document order, contiguous from 0.
    pub index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned by the retriever together with its distance to the query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk: TextChunk,
    /// Cosine distance (`1 - similarity`); smaller is closer.
    pub distance: f32,
}

/// One question and the answer it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

/// Whether the model found an answer in the retrieved context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    Found,
    NotFound,
}

/// The result of a successful `ask`.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub kind: AnswerKind,
    pub sources: Vec<RetrievedChunk>,
}

impl Answer {
    pub fn found(&self) -> bool {
        self.kind == AnswerKind::Found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
}

impl std::str::FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "positive" | "up" | "+" => Ok(Sentiment::Positive),
            "negative" | "down" | "-" => Ok(Sentiment::Negative),
            other => Err(format!(
                "invalid sentiment '{}': expected positive or negative",
                other
            )),
        }
    }
}

/// A single line of the append-only feedback log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub sentiment: Sentiment,
    pub answer: String,
    pub recorded_at: DateTime<Utc>,
}
