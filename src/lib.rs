//! # docqa
//!
//! Question answering over uploaded documents.
//!
//! docqa extracts text from PDF, Word, Excel and image files, splits it into
//! overlapping chunks, embeds the chunks into a persisted vector index and
//! answers questions by retrieving the closest chunks and handing them, with
//! the conversation so far, to a hosted chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌──────────────┐   ┌───────────┐
//! │ Extractor │──▶│ Chunker │──▶│   Indexer    │──▶│ index.json │
//! │ PDF/OOXML │   │ 1000/200│   │ embed+commit │   │  + lock    │
//! │ image/OCR │   └─────────┘   └──────┬───────┘   └───────────┘
//! └───────────┘                        │
//!                                      ▼
//!                 ┌───────────┐   ┌──────────────┐
//!                 │ Retriever │◀──│ Conversation │◀── question
//!                 │  top-k    │   │    Engine    │──▶ answer
//!                 └───────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa ingest report.pdf              # build and persist the index
//! docqa ask "What is the deadline?"    # answer from the persisted index
//! docqa chat --export chat_history.txt # interactive session
//! docqa serve                          # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction per content type |
//! | [`ocr`] | Text recognition for images |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index build, query and persistence |
//! | [`retrieve`] | Top-k similarity retrieval |
//! | [`generation`] | Chat-completion provider abstraction |
//! | [`conversation`] | Sessions and the question-answering engine |
//! | [`summarize`] | Map-reduce summarization |
//! | [`export`] | Conversation transcript export |
//! | [`feedback`] | Append-only feedback log |
//! | [`speech`] | Text-to-speech |
//! | [`pipeline`] | Orchestration used by the CLI and server |
//! | [`server`] | HTTP API |
//! | [`logging`] | Tracing setup |

pub mod chunk;
pub mod client;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod export;
pub mod extract;
pub mod feedback;
pub mod generation;
pub mod index;
pub mod logging;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod retrieve;
pub mod server;
pub mod speech;
pub mod summarize;
