//! Error taxonomy for the question-answering pipeline.
//!
//! Failures fall into four families that callers handle differently:
//!
//! | Family | Type | Caller reaction |
//! |--------|------|-----------------|
//! | Input | [`InputError`] | skip the offending item, warn the user |
//! | Service | [`ServiceError`] | surface verbatim, no retry |
//! | State | [`StateError`] | refuse the request before any work |
//! | Persistence | [`PersistenceError`] | log and surface, session keeps running |
//!
//! [`PipelineError`] wraps all of them (plus per-document [`ExtractError`]s)
//! so pipeline entry points have a single error type. Every variant leaves
//! the session in the state it had before the failing call.

use thiserror::Error;

use crate::models::SkippedDocument;

/// Result alias used by pipeline entry points.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Top-level error returned by ingestion, retrieval and conversation calls.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Problems with what the user supplied.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("no text could be extracted from the uploaded documents{}", skipped_reasons(.skipped))]
    NothingToIndex { skipped: Vec<SkippedDocument> },

    #[error("no documents were supplied")]
    NoDocuments,
}

/// `; name: reason` for every skipped document, empty when none were skipped.
fn skipped_reasons(skipped: &[SkippedDocument]) -> String {
    skipped
        .iter()
        .map(|s| format!("; {}: {}", s.name, s.reason))
        .collect()
}

/// Failures of the hosted embedding / generation / speech service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("API credential missing: environment variable {0} is not set")]
    CredentialMissing(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("speech synthesis failed: {0}")]
    SpeechFailed(String),
}

/// Requests that arrive in the wrong session state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("no documents have been processed yet; upload documents and process them first")]
    NotReady,

    #[error("the document index is being rebuilt; try again when processing completes")]
    RebuildInProgress,
}

/// Failures reading or writing the persisted index or the feedback log.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persisted index is corrupt: {0}")]
    Corrupt(String),

    #[error("index was rebuilt by another writer (expected generation {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },
}

/// Per-document extraction failure.
///
/// Only [`ExtractError::CredentialMissing`] aborts a batch; every other
/// variant skips the one document.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("image decoding failed: {0}")]
    Image(String),

    #[error("text recognition failed: {0}")]
    Ocr(String),

    #[error("API credential missing: environment variable {0} is not set")]
    CredentialMissing(String),
}

impl PipelineError {
    /// Stable machine-readable code, shared by the CLI and the HTTP API.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Service(ServiceError::CredentialMissing(_))
            | PipelineError::Extract(ExtractError::CredentialMissing(_)) => "credential_missing",
            PipelineError::Input(_) | PipelineError::Extract(_) => "bad_request",
            PipelineError::Service(_) => "service_unavailable",
            PipelineError::State(StateError::NotReady) => "not_ready",
            PipelineError::State(StateError::RebuildInProgress) => "rebuild_in_progress",
            PipelineError::Persistence(PersistenceError::Conflict { .. }) => "conflict",
            PipelineError::Persistence(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_distinguish_families() {
        let e: PipelineError = StateError::NotReady.into();
        assert_eq!(e.code(), "not_ready");

        let e: PipelineError = ServiceError::CredentialMissing("OPENAI_API_KEY".into()).into();
        assert_eq!(e.code(), "credential_missing");
        assert!(e.to_string().contains("OPENAI_API_KEY"));

        let e: PipelineError = ServiceError::EmbeddingUnavailable("quota".into()).into();
        assert_eq!(e.code(), "service_unavailable");

        let e: PipelineError = PersistenceError::Conflict {
            expected: 1,
            found: 2,
        }
        .into();
        assert_eq!(e.code(), "conflict");
    }

    #[test]
    fn nothing_to_index_lists_skipped_documents() {
        let e: PipelineError = InputError::NothingToIndex {
            skipped: vec![SkippedDocument {
                name: "broken.pdf".into(),
                reason: "PDF extraction failed: bad header".into(),
            }],
        }
        .into();
        assert_eq!(e.code(), "bad_request");
        assert_eq!(
            e.to_string(),
            "no text could be extracted from the uploaded documents; broken.pdf: PDF extraction failed: bad header"
        );

        let bare = InputError::NothingToIndex { skipped: Vec::new() };
        assert_eq!(
            bare.to_string(),
            "no text could be extracted from the uploaded documents"
        );
    }
}
