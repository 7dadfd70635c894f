//! Offline stand-ins for the hosted model service, shared by the
//! integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use docqa::config::Config;
use docqa::embedding::HashingEmbedder;
use docqa::error::{ExtractError, ServiceError};
use docqa::generation::{ChatMessage, Generator};
use docqa::ocr::TextRecognizer;
use docqa::pipeline::Pipeline;
use docqa::speech::SpeechSynthesizer;

/// Answers from the context it is given: it looks for a context line that
/// shares a word with the question and echoes it, or says it does not know.
pub struct ContextEchoGenerator {
    pub calls: AtomicUsize,
}

impl ContextEchoGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(|w| w.to_lowercase())
        .collect()
}

#[async_trait]
impl Generator for ContextEchoGenerator {
    fn model_name(&self) -> &str {
        "context-echo"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let question = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        if question.starts_with("Summarize the following text: ") {
            return Ok("A short summary.".to_string());
        }
        if question.starts_with("Chat History:") {
            let follow_up = question
                .split("Follow Up Input: ")
                .nth(1)
                .and_then(|rest| rest.split('\n').next())
                .unwrap_or_default();
            return Ok(follow_up.to_string());
        }

        let context = messages
            .first()
            .and_then(|m| m.content.split("Context:\n").nth(1))
            .unwrap_or_default();
        let question_words = words(question);
        let hit = context
            .lines()
            .find(|line| words(line).iter().any(|w| question_words.contains(w)));
        Ok(match hit {
            Some(line) => line.trim().to_string(),
            None => "I don't know.".to_string(),
        })
    }
}

pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ServiceError> {
        Err(ServiceError::GenerationFailed("upstream returned 500".to_string()))
    }
}

pub struct StubRecognizer;

#[async_trait]
impl TextRecognizer for StubRecognizer {
    async fn recognize(&self, _image: &[u8], _mime: &str) -> Result<String, ExtractError> {
        Ok("Invoice total is 42 euros.".to_string())
    }
}

pub struct StubSpeech;

#[async_trait]
impl SpeechSynthesizer for StubSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        let mut audio = b"ID3".to_vec();
        audio.extend_from_slice(text.as_bytes());
        Ok(audio)
    }
}

pub fn test_config(tmp: &TempDir) -> Config {
    let mut cfg = Config::minimal();
    cfg.embedding.provider = "hashing".to_string();
    cfg.embedding.dims = Some(256);
    cfg.index.dir = tmp.path().join("data").join("index");
    cfg.feedback.path = tmp.path().join("data").join("feedback.jsonl");
    cfg.retrieval.top_k = 2;
    cfg
}

pub fn pipeline_with(cfg: Config, generator: Arc<dyn Generator>) -> Pipeline {
    let dims = cfg.embedding.dims.unwrap_or(HashingEmbedder::DEFAULT_DIMS);
    Pipeline::with_providers(
        cfg,
        Arc::new(HashingEmbedder::new(dims)),
        generator,
        Arc::new(StubRecognizer),
        Arc::new(StubSpeech),
    )
}

/// A valid 4x4 black PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::new(4, 4);
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Minimal docx (ZIP) whose body holds one paragraph per line of `text`.
pub fn docx_with_paragraphs(text: &str) -> Vec<u8> {
    let paragraphs: String = text
        .lines()
        .map(|line| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", line))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        paragraphs
    );

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Minimal valid PDF whose single page shows `phrase`.
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
pub fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}
