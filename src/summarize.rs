//! Summarization of indexed chunks.
//!
//! Chunk texts are joined with blank lines and sent as a single
//! `Summarize the following text:` request. When the joined text exceeds
//! `summary.max_input_chars`, chunks are summarized in groups that fit and
//! the partial summaries are folded the same way until one request fits.

use crate::error::{InputError, Result, ServiceError};
use crate::generation::{ChatMessage, Generator};
use crate::models::TextChunk;

const PROMPT_PREFIX: &str = "Summarize the following text: ";
const JOIN: &str = "\n\n";
/// Fold rounds before the remaining text is cut to the cap.
const MAX_FOLD_ROUNDS: usize = 8;

pub struct Summarizer<'a> {
    generator: &'a dyn Generator,
    max_input_chars: usize,
}

impl<'a> Summarizer<'a> {
    pub fn new(generator: &'a dyn Generator, max_input_chars: usize) -> Self {
        Self {
            generator,
            max_input_chars: max_input_chars.max(1),
        }
    }

    pub async fn summarize(&self, chunks: &[TextChunk]) -> Result<String> {
        let mut pieces: Vec<String> = chunks
            .iter()
            .map(|c| c.text.clone())
            .filter(|t| !t.trim().is_empty())
            .collect();
        if pieces.is_empty() {
            return Err(InputError::NothingToIndex { skipped: Vec::new() }.into());
        }

        let mut round = 0usize;
        loop {
            let groups = self.group(&pieces);
            if groups.len() == 1 {
                return Ok(self.request(&groups[0]).await?);
            }
            if round == MAX_FOLD_ROUNDS {
                tracing::warn!(rounds = round, "summaries are not shrinking, truncating input");
                let text: String = groups.join(JOIN).chars().take(self.max_input_chars).collect();
                return Ok(self.request(&text).await?);
            }
            round += 1;
            tracing::info!(round, groups = groups.len(), "summarizing in parts");
            let mut partials = Vec::with_capacity(groups.len());
            for group in &groups {
                partials.push(self.request(group).await?);
            }
            pieces = partials;
        }
    }

    /// Pack pieces into joined groups of at most `max_input_chars`.
    ///
    /// A single piece longer than the cap is cut to the cap.
    fn group(&self, pieces: &[String]) -> Vec<String> {
        let cap = self.max_input_chars;
        let mut groups = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;

        for piece in pieces {
            let piece: String = piece.chars().take(cap).collect();
            let len = piece.chars().count();
            let joined_len = if current.is_empty() {
                len
            } else {
                current_len + JOIN.len() + len
            };
            if !current.is_empty() && joined_len > cap {
                groups.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push_str(JOIN);
                current_len += JOIN.len();
            }
            current.push_str(&piece);
            current_len += len;
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    async fn request(&self, text: &str) -> std::result::Result<String, ServiceError> {
        let messages = [ChatMessage::user(format!("{}{}", PROMPT_PREFIX, text))];
        self.generator.complete(&messages).await
    }
}
