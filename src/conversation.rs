//! Sessions and the retrieval-augmented conversation engine.
//!
//! A [`Session`] owns one user's conversation: its state (whether an index
//! is attached) and its history. The [`Engine`] answers questions against a
//! session by retrieving the closest chunks, composing them with the prior
//! turns into a chat request and calling the [`Generator`] once.
//!
//! # State machine
//!
//! ```text
//!            begin_rebuild             finish_rebuild(Some)
//!   Idle ────────────────▶ Rebuilding ─────────────────────▶ Ready
//!    ▲                      │    ▲                           │
//!    └── finish_rebuild(None)    └────── begin_rebuild ──────┘
//! ```
//!
//! `finish_rebuild(None)` restores whatever state preceded the rebuild.
//! `attach` moves any non-rebuilding session straight to `Ready`. Entering
//! `Ready` with a new index clears the history.

use std::sync::Arc;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{InputError, Result, StateError};
use crate::generation::{ChatMessage, Generator};
use crate::index::VectorIndex;
use crate::models::{Answer, AnswerKind, ConversationTurn, RetrievedChunk};
use crate::retrieve::Retriever;

/// Phrases the model uses when the context does not contain the answer.
pub const NOT_FOUND_MARKERS: [&str; 2] = ["I don't know", "I couldn't find an answer"];

const QA_INSTRUCTION: &str = "Use the following pieces of context to answer the user's question. \
If the answer is not contained in the context, reply exactly: I don't know. \
Do not make up an answer.";

const CONDENSE_INSTRUCTION: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language. \
Reply with the standalone question only.";

#[derive(Debug, Clone)]
pub enum SessionState {
    Idle,
    Rebuilding { previous: Box<SessionState> },
    Ready(Arc<VectorIndex>),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Rebuilding { .. } => "rebuilding",
            SessionState::Ready(_) => "ready",
        }
    }
}

#[derive(Debug)]
pub struct Session {
    id: String,
    state: SessionState,
    history: Vec<ConversationTurn>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Idle,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// The attached index, if the session is ready.
    pub fn index(&self) -> Option<Arc<VectorIndex>> {
        match &self.state {
            SessionState::Ready(index) => Some(Arc::clone(index)),
            _ => None,
        }
    }

    /// Enter `Rebuilding`, remembering the current state.
    pub fn begin_rebuild(&mut self) -> std::result::Result<(), StateError> {
        if matches!(self.state, SessionState::Rebuilding { .. }) {
            return Err(StateError::RebuildInProgress);
        }
        let previous = std::mem::replace(&mut self.state, SessionState::Idle);
        self.state = SessionState::Rebuilding {
            previous: Box::new(previous),
        };
        Ok(())
    }

    /// Leave `Rebuilding`: `Some(index)` makes the session ready on the new
    /// index, `None` restores the previous state and keeps the history.
    pub fn finish_rebuild(&mut self, rebuilt: Option<Arc<VectorIndex>>) {
        let state = std::mem::replace(&mut self.state, SessionState::Idle);
        self.state = match (rebuilt, state) {
            (Some(index), _) => {
                self.history.clear();
                SessionState::Ready(index)
            }
            (None, SessionState::Rebuilding { previous }) => *previous,
            (None, other) => other,
        };
    }

    /// Attach an index loaded from storage.
    pub fn attach(&mut self, index: Arc<VectorIndex>) -> std::result::Result<(), StateError> {
        if matches!(self.state, SessionState::Rebuilding { .. }) {
            return Err(StateError::RebuildInProgress);
        }
        self.history.clear();
        self.state = SessionState::Ready(index);
        Ok(())
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// The attached index, or the state error explaining why there is none.
    pub fn ready_index(&self) -> std::result::Result<Arc<VectorIndex>, StateError> {
        match &self.state {
            SessionState::Ready(index) => Ok(Arc::clone(index)),
            SessionState::Idle => Err(StateError::NotReady),
            SessionState::Rebuilding { .. } => Err(StateError::RebuildInProgress),
        }
    }
}

/// `NotFound` when the model said it could not answer.
pub fn classify_answer(text: &str) -> AnswerKind {
    if NOT_FOUND_MARKERS.iter().any(|m| text.contains(m)) {
        AnswerKind::NotFound
    } else {
        AnswerKind::Found
    }
}

/// Build the chat request for one question.
pub fn compose_messages(
    sources: &[RetrievedChunk],
    history: &[ConversationTurn],
    question: &str,
) -> Vec<ChatMessage> {
    let context = sources
        .iter()
        .map(|s| s.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(format!(
        "{}\n\nContext:\n{}",
        QA_INSTRUCTION, context
    )));
    for turn in history {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }
    messages.push(ChatMessage::user(question));
    messages
}

fn condense_messages(history: &[ConversationTurn], question: &str) -> Vec<ChatMessage> {
    let transcript = history
        .iter()
        .map(|t| format!("Human: {}\nAssistant: {}", t.question, t.answer))
        .collect::<Vec<_>>()
        .join("\n");
    vec![
        ChatMessage::system(CONDENSE_INSTRUCTION),
        ChatMessage::user(format!(
            "Chat History:\n{}\nFollow Up Input: {}\nStandalone question:",
            transcript, question
        )),
    ]
}

pub struct Engine {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    top_k: usize,
    condense_question: bool,
}

impl Engine {
    pub fn new(config: &Config, embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> Self {
        Self {
            embedder,
            generator,
            top_k: config.retrieval.top_k,
            condense_question: config.retrieval.condense_question,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    /// Answer `question` in `session`.
    ///
    /// On any error the session history is left exactly as it was.
    pub async fn ask(&self, session: &mut Session, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(InputError::EmptyQuestion.into());
        }
        let index = session.ready_index()?;

        let search_query = if self.condense_question && !session.history.is_empty() {
            let standalone = self
                .generator
                .complete(&condense_messages(&session.history, question))
                .await?;
            let standalone = standalone.trim();
            tracing::debug!(standalone, "condensed follow-up question");
            if standalone.is_empty() {
                question.to_string()
            } else {
                standalone.to_string()
            }
        } else {
            question.to_string()
        };

        let sources = Retriever::new(&index, self.embedder.as_ref(), self.top_k)
            .retrieve(&search_query)
            .await?;

        let messages = compose_messages(&sources, &session.history, question);
        let text = self.generator.complete(&messages).await?;
        let kind = classify_answer(&text);

        tracing::info!(
            session = %session.id,
            sources = sources.len(),
            found = kind == AnswerKind::Found,
            "answered question"
        );

        session.history.push(ConversationTurn {
            question: question.to_string(),
            answer: text.clone(),
        });

        Ok(Answer {
            text,
            kind,
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::embedding::HashingEmbedder;
    use crate::error::{PipelineError, ServiceError};
    use crate::index::build;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedGenerator {
        replies: Mutex<Vec<std::result::Result<String, String>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<std::result::Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
        ) -> std::result::Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            match self.replies.lock().unwrap().pop() {
                Some(Ok(text)) => Ok(text),
                Some(Err(e)) => Err(ServiceError::GenerationFailed(e)),
                None => Err(ServiceError::GenerationFailed("script exhausted".into())),
            }
        }
    }

    fn config(condense: bool) -> Config {
        let mut cfg = Config::minimal();
        cfg.retrieval.condense_question = condense;
        cfg
    }

    async fn ready_session(text: &str) -> Session {
        let embedder = HashingEmbedder::new(64);
        let index = build(chunk_text(text, 1000, 200), &embedder, 8).await.unwrap();
        let mut session = Session::new("test");
        session.attach(Arc::new(index)).unwrap();
        session
    }

    fn engine(generator: Arc<ScriptedGenerator>, condense: bool) -> Engine {
        Engine::new(&config(condense), Arc::new(HashingEmbedder::new(64)), generator)
    }

    #[test]
    fn classify_detects_not_found_phrases() {
        assert_eq!(classify_answer("I don't know."), AnswerKind::NotFound);
        assert_eq!(
            classify_answer("Sorry, I couldn't find an answer in the documents."),
            AnswerKind::NotFound
        );
        assert_eq!(classify_answer("Paris."), AnswerKind::Found);
        assert_eq!(classify_answer("i don't know"), AnswerKind::Found);
    }

    #[tokio::test]
    async fn ask_before_any_index_is_not_ready_and_never_calls_model() {
        let generator = ScriptedGenerator::new(vec![Ok("unused")]);
        let engine = engine(generator.clone(), true);
        let mut session = Session::new("s");
        let err = engine.ask(&mut session, "anything?").await.unwrap_err();
        assert!(matches!(err, PipelineError::State(StateError::NotReady)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn empty_question_rejected() {
        let generator = ScriptedGenerator::new(vec![]);
        let engine = engine(generator.clone(), false);
        let mut session = ready_session("some text").await;
        let err = engine.ask(&mut session, "   ").await.unwrap_err();
        assert!(matches!(err, PipelineError::Input(InputError::EmptyQuestion)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn answer_is_recorded_and_sources_reach_the_model() {
        let generator = ScriptedGenerator::new(vec![Ok("Paris.")]);
        let engine = engine(generator.clone(), true);
        let mut session = ready_session("The capital of France is Paris.").await;

        let answer = engine
            .ask(&mut session, "What is the capital of France?")
            .await
            .unwrap();
        assert_eq!(answer.text, "Paris.");
        assert!(answer.found());
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(
            session.history(),
            &[ConversationTurn {
                question: "What is the capital of France?".into(),
                answer: "Paris.".into(),
            }]
        );

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "no condense call on an empty history");
        assert!(seen[0][0].content.contains("The capital of France is Paris."));
    }

    #[tokio::test]
    async fn failed_generation_leaves_history_unchanged() {
        let generator = ScriptedGenerator::new(vec![Ok("first"), Err("quota exceeded")]);
        let engine = engine(generator.clone(), false);
        let mut session = ready_session("content").await;

        engine.ask(&mut session, "one?").await.unwrap();
        let before = session.history().to_vec();
        let err = engine.ask(&mut session, "two?").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Service(ServiceError::GenerationFailed(_))
        ));
        assert_eq!(session.history(), before.as_slice());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2, "no retry");
    }

    #[tokio::test]
    async fn not_found_answer_is_flagged() {
        let generator = ScriptedGenerator::new(vec![Ok("I don't know.")]);
        let engine = engine(generator, false);
        let mut session = ready_session("Bananas are yellow.").await;
        let answer = engine.ask(&mut session, "Who wrote Hamlet?").await.unwrap();
        assert_eq!(answer.kind, AnswerKind::NotFound);
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn follow_up_is_condensed_and_history_is_sent() {
        let generator = ScriptedGenerator::new(vec![
            Ok("Paris."),
            Ok("What is the population of Paris?"),
            Ok("About two million."),
        ]);
        let engine = engine(generator.clone(), true);
        let mut session = ready_session("The capital of France is Paris.").await;

        engine.ask(&mut session, "Capital of France?").await.unwrap();
        engine.ask(&mut session, "And its population?").await.unwrap();

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[1][1].content.contains("Follow Up Input: And its population?"));
        let last = &seen[2];
        // system, prior user, prior assistant, new question
        assert_eq!(last.len(), 4);
        assert_eq!(last[1], ChatMessage::user("Capital of France?"));
        assert_eq!(last[2], ChatMessage::assistant("Paris."));
        assert_eq!(last[3], ChatMessage::user("And its population?"));
    }

    #[tokio::test]
    async fn rebuilding_session_refuses_questions() {
        let generator = ScriptedGenerator::new(vec![]);
        let engine = engine(generator.clone(), false);
        let mut session = ready_session("content").await;
        session.begin_rebuild().unwrap();
        let err = engine.ask(&mut session, "q?").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::State(StateError::RebuildInProgress)
        ));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rebuild_transitions() {
        let mut session = ready_session("old").await;
        session.history.push(ConversationTurn {
            question: "q".into(),
            answer: "a".into(),
        });

        session.begin_rebuild().unwrap();
        assert_eq!(session.begin_rebuild(), Err(StateError::RebuildInProgress));

        // failed rebuild restores the old index and keeps history
        session.finish_rebuild(None);
        assert_eq!(session.state().name(), "ready");
        assert_eq!(session.history().len(), 1);

        session.begin_rebuild().unwrap();
        let fresh = VectorIndex::from_parts("hashing", 64, Vec::new(), Vec::new());
        session.finish_rebuild(Some(Arc::new(fresh)));
        assert_eq!(session.state().name(), "ready");
        assert!(session.history().is_empty());
        assert!(session.index().unwrap().is_empty());
    }

    #[test]
    fn failed_first_rebuild_returns_to_idle() {
        let mut session = Session::new("s");
        session.begin_rebuild().unwrap();
        session.finish_rebuild(None);
        assert_eq!(session.state().name(), "idle");
    }
}
