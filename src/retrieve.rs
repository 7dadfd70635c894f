//! Similarity retrieval over a [`VectorIndex`].
//!
//! Embeds the query with the same provider that built the index and returns
//! the `top_k` nearest chunks, closest first.

use crate::embedding::{embed_query, Embedder};
use crate::error::ServiceError;
use crate::index::VectorIndex;
use crate::models::RetrievedChunk;

pub const DEFAULT_TOP_K: usize = 4;

pub struct Retriever<'a> {
    index: &'a VectorIndex,
    embedder: &'a dyn Embedder,
    top_k: usize,
}

impl<'a> Retriever<'a> {
    pub fn new(index: &'a VectorIndex, embedder: &'a dyn Embedder, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k: top_k.max(1),
        }
    }

    /// Return at most `top_k` chunks ordered by ascending distance.
    ///
    /// An empty index short-circuits without calling the embedder. An index
    /// whose vectors have a different dimension than the embedder produces
    /// is refused before any embedding call.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, ServiceError> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        if self.embedder.dims() != self.index.dims {
            return Err(ServiceError::EmbeddingUnavailable(format!(
                "index holds {}-dimensional vectors from {}, but {} produces {}; re-ingest the documents",
                self.index.dims,
                self.index.model,
                self.embedder.model_name(),
                self.embedder.dims()
            )));
        }

        if self.embedder.model_name() != self.index.model {
            tracing::warn!(
                index_model = %self.index.model,
                query_model = %self.embedder.model_name(),
                "query embedder differs from the model that built the index"
            );
        }

        let query_vec = embed_query(self.embedder, query).await?;
        let hits = self.index.query(&query_vec, self.top_k);
        tracing::debug!(
            hits = hits.len(),
            best = hits.first().map(|h| h.distance),
            "retrieved chunks"
        );
        Ok(hits)
    }
}
