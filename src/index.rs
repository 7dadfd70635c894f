//! Persisted vector index: build, query, save and load.
//!
//! A [`VectorIndex`] is a flat list of `(TextChunk, embedding)` pairs
//! searched by brute-force cosine distance. It is only ever replaced
//! wholesale: ingestion builds a new index from the current upload and
//! commits it over the persisted one.
//!
//! # On-disk layout
//!
//! ```text
//! <index.dir>/
//!   index.json    serialized index, vectors as base64 little-endian f32
//!   index.lock    advisory lock file for writers
//! ```
//!
//! # Single-writer discipline
//!
//! [`IndexStore::commit`] holds an exclusive `fs2` lock on `index.lock` and
//! compares the persisted generation against the generation the writer
//! started from. If another writer committed in the meantime the commit is
//! refused with [`PersistenceError::Conflict`]. The file itself is written
//! to a temporary path and renamed into place, so readers never see a
//! partial index and need no lock.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::path::PathBuf;

use crate::embedding::{blob_to_vec, cosine_similarity, embed_batched, vec_to_blob, Embedder};
use crate::error::{PersistenceError, ServiceError};
use crate::models::{RetrievedChunk, TextChunk};

const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = "index.lock";
const FORMAT_VERSION: u32 = 1;

/// One indexed chunk and its embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: TextChunk,
    pub vector: Vec<f32>,
}

/// In-memory vector index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    /// Commit counter of the persisted index; 0 until committed.
    pub generation: u64,
    pub model: String,
    pub dims: usize,
    /// SHA-256 over the chunk hashes in order; identifies the indexed content.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Assemble an index from chunks and their vectors (same order).
    pub fn from_parts(model: &str, dims: usize, chunks: Vec<TextChunk>, vectors: Vec<Vec<f32>>) -> Self {
        let content_hash = content_hash_of(&chunks);
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();
        Self {
            generation: 0,
            model: model.to_string(),
            dims,
            content_hash,
            created_at: Utc::now(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn chunks(&self) -> impl Iterator<Item = &TextChunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// Return at most `k` chunks ordered by ascending cosine distance.
    ///
    /// Ties are broken by chunk index so results are deterministic. An
    /// empty index yields an empty result.
    pub fn query(&self, query_vec: &[f32], k: usize) -> Vec<RetrievedChunk> {
        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|e| (1.0 - cosine_similarity(query_vec, &e.vector), e))
            .collect();

        scored.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.chunk.index.cmp(&b.1.chunk.index))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(distance, e)| RetrievedChunk {
                chunk: e.chunk.clone(),
                distance,
            })
            .collect()
    }
}

fn content_hash_of(chunks: &[TextChunk]) -> String {
    let mut hasher = Sha256::new();
    for c in chunks {
        hasher.update(c.hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Embed `chunks` and assemble a fresh, uncommitted index.
///
/// Embedding failures propagate unchanged; nothing is persisted here.
pub async fn build(
    chunks: Vec<TextChunk>,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<VectorIndex, ServiceError> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_batched(embedder, &texts, batch_size).await?;
    tracing::info!(
        chunks = chunks.len(),
        model = embedder.model_name(),
        "embedded chunks"
    );
    Ok(VectorIndex::from_parts(
        embedder.model_name(),
        embedder.dims(),
        chunks,
        vectors,
    ))
}

// ============ Persistence ============

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    generation: u64,
    model: String,
    dims: usize,
    content_hash: String,
    created_at: DateTime<Utc>,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    index: usize,
    text: String,
    hash: String,
    /// Base64 of little-endian f32 bytes.
    vector: String,
}

/// Only the header fields, for cheap generation checks.
#[derive(Deserialize)]
struct PersistedHeader {
    generation: u64,
}

impl From<&VectorIndex> for PersistedIndex {
    fn from(index: &VectorIndex) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            generation: index.generation,
            model: index.model.clone(),
            dims: index.dims,
            content_hash: index.content_hash.clone(),
            created_at: index.created_at,
            entries: index
                .entries
                .iter()
                .map(|e| PersistedEntry {
                    index: e.chunk.index,
                    text: e.chunk.text.clone(),
                    hash: e.chunk.hash.clone(),
                    vector: BASE64.encode(vec_to_blob(&e.vector)),
                })
                .collect(),
        }
    }
}

impl TryFrom<PersistedIndex> for VectorIndex {
    type Error = PersistenceError;

    fn try_from(p: PersistedIndex) -> Result<Self, Self::Error> {
        if p.format_version != FORMAT_VERSION {
            return Err(PersistenceError::Corrupt(format!(
                "unsupported format version {}",
                p.format_version
            )));
        }
        let mut entries = Vec::with_capacity(p.entries.len());
        for e in p.entries {
            let bytes = BASE64
                .decode(e.vector.as_bytes())
                .map_err(|err| PersistenceError::Corrupt(format!("chunk {}: {}", e.index, err)))?;
            let vector = blob_to_vec(&bytes);
            if vector.len() != p.dims {
                return Err(PersistenceError::Corrupt(format!(
                    "chunk {} has {} dimensions, index declares {}",
                    e.index,
                    vector.len(),
                    p.dims
                )));
            }
            entries.push(IndexEntry {
                chunk: TextChunk {
                    index: e.index,
                    text: e.text,
                    hash: e.hash,
                },
                vector,
            });
        }
        Ok(VectorIndex {
            generation: p.generation,
            model: p.model,
            dims: p.dims,
            content_hash: p.content_hash,
            created_at: p.created_at,
            entries,
        })
    }
}

/// Location of the persisted index on durable storage.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Whether an index has ever been committed here.
    pub fn exists(&self) -> bool {
        self.index_path().is_file()
    }

    /// Load the persisted index, or `None` if nothing has been committed.
    pub fn load(&self) -> Result<Option<VectorIndex>, PersistenceError> {
        let path = self.index_path();
        let content = match std::fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let persisted: PersistedIndex = serde_json::from_slice(&content)
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        let index = VectorIndex::try_from(persisted)?;
        tracing::info!(
            path = %path.display(),
            generation = index.generation,
            chunks = index.len(),
            "loaded persisted index"
        );
        Ok(Some(index))
    }

    /// Generation of the persisted index; 0 when none exists.
    ///
    /// An index file whose header cannot be parsed also counts as
    /// generation 0, so the next commit replaces it. [`IndexStore::load`]
    /// still reports it as [`PersistenceError::Corrupt`].
    pub fn current_generation(&self) -> Result<u64, PersistenceError> {
        let path = self.index_path();
        match std::fs::read(&path) {
            Ok(content) => match serde_json::from_slice::<PersistedHeader>(&content) {
                Ok(header) => Ok(header.generation),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "persisted index is unreadable; treating it as replaceable"
                    );
                    Ok(0)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the persisted index with `index`.
    ///
    /// `expected_generation` is the generation observed when the rebuild
    /// started. Returns the committed index carrying its new generation.
    /// Blocks while another writer holds the lock.
    pub fn commit(
        &self,
        mut index: VectorIndex,
        expected_generation: u64,
    ) -> Result<VectorIndex, PersistenceError> {
        std::fs::create_dir_all(&self.dir)?;
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))?;
        lock.lock_exclusive()?;

        let result = self.commit_locked(&mut index, expected_generation);
        let _ = FileExt::unlock(&lock);
        result.map(|_| index)
    }

    fn commit_locked(
        &self,
        index: &mut VectorIndex,
        expected_generation: u64,
    ) -> Result<(), PersistenceError> {
        let found = self.current_generation()?;
        if found != expected_generation {
            return Err(PersistenceError::Conflict {
                expected: expected_generation,
                found,
            });
        }

        index.generation = expected_generation + 1;
        let json = serde_json::to_vec(&PersistedIndex::from(&*index))
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;

        let tmp = self.dir.join(format!("{}.tmp", INDEX_FILE));
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, self.index_path())?;

        tracing::info!(
            dir = %self.dir.display(),
            generation = index.generation,
            chunks = index.len(),
            content_hash = %index.content_hash,
            "committed index"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::embedding::HashingEmbedder;
    use tempfile::TempDir;

    fn sample_chunks() -> Vec<TextChunk> {
        let text = "Rust guarantees memory safety.\nCargo builds Rust crates.\nParis is the capital of France.\nBananas are yellow.";
        chunk_text(text, 40, 0)
    }

    #[tokio::test]
    async fn test_query_returns_at_most_k_sorted() {
        let embedder = HashingEmbedder::new(128);
        let chunks = sample_chunks();
        let n = chunks.len();
        assert_eq!(n, 4);
        let index = build(chunks, &embedder, 2).await.unwrap();

        let q = embedder.embed_text("capital of France");
        for k in [1, 3, 4, 10] {
            let hits = index.query(&q, k);
            assert_eq!(hits.len(), k.min(n));
            for pair in hits.windows(2) {
                assert!(pair[0].distance <= pair[1].distance);
            }
        }
        assert!(index.query(&q, 1)[0].chunk.text.contains("Paris"));
    }

    #[test]
    fn test_empty_index_query_is_empty() {
        let index = VectorIndex::from_parts("hashing", 8, Vec::new(), Vec::new());
        assert!(index.query(&[0.0; 8], 4).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_ties_break_by_chunk_index() {
        let chunks = chunk_text("a\nb\nc", 1, 0);
        let vectors = vec![vec![1.0, 0.0]; 3];
        let index = VectorIndex::from_parts("test", 2, chunks, vectors);
        let hits = index.query(&[1.0, 0.0], 3);
        let order: Vec<usize> = hits.iter().map(|h| h.chunk.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_commit_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("index"));
        assert!(!store.exists());
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.current_generation().unwrap(), 0);

        let embedder = HashingEmbedder::new(16);
        let index = build(sample_chunks(), &embedder, 8).await.unwrap();
        let committed = store.commit(index.clone(), 0).unwrap();
        assert_eq!(committed.generation, 1);

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.generation, 1);
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.content_hash, index.content_hash);
        for (a, b) in loaded.entries().iter().zip(index.entries()) {
            assert_eq!(a.chunk, b.chunk);
            assert_eq!(a.vector, b.vector);
        }
    }

    #[tokio::test]
    async fn test_commit_overwrites_previous_index() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HashingEmbedder::new(16);

        let first = build(chunk_text("old document", 100, 10), &embedder, 8).await.unwrap();
        store.commit(first, 0).unwrap();
        let second = build(chunk_text("new document", 100, 10), &embedder, 8).await.unwrap();
        store.commit(second, 1).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.generation, 2);
        let texts: Vec<&str> = loaded.chunks().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["new document"]);
    }

    #[tokio::test]
    async fn test_stale_writer_is_refused() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path());
        let embedder = HashingEmbedder::new(16);

        // Both writers start from generation 0; the second to commit loses.
        let a = build(chunk_text("writer a", 100, 10), &embedder, 8).await.unwrap();
        let b = build(chunk_text("writer b", 100, 10), &embedder, 8).await.unwrap();
        store.commit(a, 0).unwrap();
        let err = store.commit(b, 0).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::Conflict {
                expected: 0,
                found: 1
            }
        ));

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.chunks().next().unwrap().text, "writer a");
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(INDEX_FILE), b"{not json").unwrap();
        let store = IndexStore::new(tmp.path());
        assert!(matches!(store.load(), Err(PersistenceError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_commit_replaces_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(INDEX_FILE), b"{not json").unwrap();
        let store = IndexStore::new(tmp.path());
        assert_eq!(store.current_generation().unwrap(), 0);

        let index = build(sample_chunks(), &HashingEmbedder::new(16), 8).await.unwrap();
        let committed = store.commit(index, 0).unwrap();
        assert_eq!(committed.generation, 1);
        assert_eq!(store.load().unwrap().unwrap().generation, 1);
    }
}
