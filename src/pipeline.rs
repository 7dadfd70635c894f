//! Ingestion and question-answering orchestration.
//!
//! [`Pipeline`] wires the extractor, chunker, indexer, conversation engine
//! and the ancillary services together behind the operations the CLI and
//! the HTTP server expose.
//!
//! # Ingestion
//!
//! ```text
//! documents ─▶ extract_all ─▶ chunk_text ─▶ index::build ─▶ IndexStore::commit
//!                 │ skipped                                   │ generation CAS
//!                 ▼                                           ▼
//!            IngestReport                            session → Ready(index)
//! ```
//!
//! Ingestion always builds a fresh index from the current upload and
//! overwrites the persisted one. A persisted index is reused only through
//! an explicit [`Pipeline::load`].

use serde::Serialize;
use std::sync::Arc;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::conversation::{Engine, Session};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{InputError, PersistenceError, Result};
use crate::export::render_transcript;
use crate::extract::Extractor;
use crate::feedback::FeedbackLog;
use crate::generation::{create_generator, Generator};
use crate::index::{self, IndexStore, VectorIndex};
use crate::models::{Answer, Document, FeedbackRecord, Sentiment, SkippedDocument, TextChunk};
use crate::ocr::{create_recognizer, TextRecognizer};
use crate::speech::{create_synthesizer, SpeechSynthesizer};
use crate::summarize::Summarizer;

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub generation: u64,
    pub content_hash: String,
    pub skipped: Vec<SkippedDocument>,
}

pub struct Pipeline {
    config: Config,
    extractor: Extractor,
    engine: Engine,
    store: IndexStore,
    feedback: FeedbackLog,
    speech: Arc<dyn SpeechSynthesizer>,
}

impl Pipeline {
    /// Build a pipeline with the providers named in `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config)?;
        let generator = create_generator(&config);
        let recognizer = create_recognizer(&config);
        let speech = create_synthesizer(&config);
        Ok(Self::with_providers(config, embedder, generator, recognizer, speech))
    }

    pub fn with_providers(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        recognizer: Arc<dyn TextRecognizer>,
        speech: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            extractor: Extractor::new(recognizer),
            engine: Engine::new(&config, embedder, generator),
            store: IndexStore::new(config.index.dir.clone()),
            feedback: FeedbackLog::new(config.feedback.path.clone()),
            speech,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Extract and chunk `docs`.
    ///
    /// Fails with [`InputError::NothingToIndex`], carrying every skip
    /// reason, when no document yields text.
    pub async fn prepare(&self, docs: &[Document]) -> Result<(Vec<TextChunk>, Vec<SkippedDocument>)> {
        if docs.is_empty() {
            return Err(InputError::NoDocuments.into());
        }
        let extraction = self.extractor.extract_all(docs).await?;
        let text = extraction.combined_text();
        let chunks = chunk_text(&text, self.config.chunking.size, self.config.chunking.overlap);
        if chunks.is_empty() {
            return Err(InputError::NothingToIndex {
                skipped: extraction.skipped,
            }
            .into());
        }
        tracing::info!(
            documents = docs.len(),
            skipped = extraction.skipped.len(),
            chunks = chunks.len(),
            "prepared documents"
        );
        Ok((chunks, extraction.skipped))
    }

    /// Build an index from `docs` and commit it over the persisted one.
    ///
    /// `expected_generation` is the persisted generation observed before the
    /// work started; a concurrent commit makes this one fail with
    /// [`PersistenceError::Conflict`].
    pub async fn rebuild(
        &self,
        docs: &[Document],
        expected_generation: u64,
    ) -> Result<(Arc<VectorIndex>, IngestReport)> {
        let (chunks, skipped) = self.prepare(docs).await?;
        let built = index::build(
            chunks,
            self.engine.embedder().as_ref(),
            self.config.embedding.batch_size,
        )
        .await?;

        let store = self.store.clone();
        let committed = tokio::task::spawn_blocking(move || store.commit(built, expected_generation))
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))??;

        let report = IngestReport {
            documents: docs.len(),
            chunks: committed.len(),
            generation: committed.generation,
            content_hash: committed.content_hash.clone(),
            skipped,
        };
        Ok((Arc::new(committed), report))
    }

    /// Ingest `docs` into an exclusively borrowed session.
    pub async fn ingest(&self, session: &mut Session, docs: &[Document]) -> Result<IngestReport> {
        session.begin_rebuild()?;
        let outcome = match self.current_generation().await {
            Ok(expected) => self.rebuild(docs, expected).await,
            Err(e) => Err(e),
        };
        Self::settle(session, outcome)
    }

    /// Ingest `docs` into a shared session.
    ///
    /// The session lock is held only to enter and leave `Rebuilding`, so
    /// other requests against the session are answered (and refused by the
    /// state machine) while extraction and embedding run.
    pub async fn ingest_shared(
        &self,
        session: &tokio::sync::Mutex<Session>,
        docs: &[Document],
    ) -> Result<IngestReport> {
        if docs.is_empty() {
            return Err(InputError::NoDocuments.into());
        }
        session.lock().await.begin_rebuild()?;
        let outcome = match self.current_generation().await {
            Ok(expected) => self.rebuild(docs, expected).await,
            Err(e) => Err(e),
        };
        let mut guard = session.lock().await;
        Self::settle(&mut guard, outcome)
    }

    fn settle(
        session: &mut Session,
        outcome: Result<(Arc<VectorIndex>, IngestReport)>,
    ) -> Result<IngestReport> {
        match outcome {
            Ok((index, report)) => {
                session.finish_rebuild(Some(index));
                tracing::info!(
                    session = %session.id(),
                    generation = report.generation,
                    chunks = report.chunks,
                    "session ready on rebuilt index"
                );
                Ok(report)
            }
            Err(e) => {
                session.finish_rebuild(None);
                tracing::warn!(session = %session.id(), error = %e, "ingestion failed, state restored");
                Err(e)
            }
        }
    }

    async fn current_generation(&self) -> Result<u64> {
        let store = self.store.clone();
        let generation = tokio::task::spawn_blocking(move || store.current_generation())
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))??;
        Ok(generation)
    }

    /// Attach the persisted index to `session`. Returns `false` when no
    /// index has been committed yet.
    pub async fn load(&self, session: &mut Session) -> Result<bool> {
        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))??;
        match loaded {
            Some(index) => {
                session.attach(Arc::new(index))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn ask(&self, session: &mut Session, question: &str) -> Result<Answer> {
        self.engine.ask(session, question).await
    }

    /// Summarize freshly uploaded documents without touching any index.
    pub async fn summarize_documents(&self, docs: &[Document]) -> Result<String> {
        let (chunks, _) = self.prepare(docs).await?;
        self.summarize_chunks(&chunks).await
    }

    /// Summarize the index attached to `session`.
    pub async fn summarize_session(&self, session: &Session) -> Result<String> {
        let index = session.ready_index()?;
        let chunks: Vec<TextChunk> = index.chunks().cloned().collect();
        self.summarize_chunks(&chunks).await
    }

    async fn summarize_chunks(&self, chunks: &[TextChunk]) -> Result<String> {
        Summarizer::new(
            self.engine.generator().as_ref(),
            self.config.summary.max_input_chars,
        )
        .summarize(chunks)
        .await
    }

    pub fn record_feedback(&self, sentiment: Sentiment, answer: &str) -> Result<FeedbackRecord> {
        Ok(self.feedback.record(sentiment, answer)?)
    }

    pub async fn speak(&self, text: &str) -> Result<Vec<u8>> {
        Ok(self.speech.synthesize(text).await?)
    }

    pub fn transcript(&self, session: &Session) -> String {
        render_transcript(session.history())
    }
}
