//! Multi-format text extraction for uploaded documents.
//!
//! Callers supply bytes plus a declared content type; this module returns
//! plain UTF-8 text. PDF and OOXML formats are parsed locally. Images are
//! decoded locally and then handed to a [`TextRecognizer`].
//!
//! | Content type | Strategy |
//! |--------------|----------|
//! | `application/pdf` | page text in order (`pdf-extract`) |
//! | `.docx` | `<w:t>` runs per `<w:p>` paragraph, one paragraph per line |
//! | `.xlsx` | one line per `<row>`, cell values separated by spaces |
//! | `image/png`, `image/jpeg` | decode, then OCR |
//! | anything else | empty text and a warning |

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use quick_xml::events::Event;

use crate::error::{ExtractError, ServiceError};
use crate::models::{Document, SkippedDocument};
use crate::ocr::TextRecognizer;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Map a file extension to the content type the extractor dispatches on.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "xlsx" => Some(MIME_XLSX),
        "png" => Some(MIME_PNG),
        "jpg" | "jpeg" => Some(MIME_JPEG),
        _ => None,
    }
}

/// Lowercase and strip parameters such as `; charset=binary`.
fn normalize_content_type(content_type: &str) -> String {
    let base = content_type.split(';').next().unwrap_or_default();
    match base.trim().to_ascii_lowercase().as_str() {
        "image/jpg" => MIME_JPEG.to_string(),
        other => other.to_string(),
    }
}

/// Text gathered from a batch of uploads.
#[derive(Debug, Default)]
pub struct Extraction {
    /// `(document name, text)` in upload order, successful documents only.
    pub texts: Vec<(String, String)>,
    pub skipped: Vec<SkippedDocument>,
}

impl Extraction {
    /// Concatenated text of every successful document, one per line.
    pub fn combined_text(&self) -> String {
        self.texts
            .iter()
            .map(|(_, t)| t.as_str())
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct Extractor {
    recognizer: Arc<dyn TextRecognizer>,
}

impl Extractor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }

    /// Extract the text of one document.
    pub async fn extract(&self, doc: &Document) -> Result<String, ExtractError> {
        let content_type = normalize_content_type(&doc.content_type);
        match content_type.as_str() {
            MIME_PNG | MIME_JPEG => {
                decode_image(&doc.bytes, &content_type)?;
                self.recognizer.recognize(&doc.bytes, &content_type).await
            }
            _ => extract_text(&doc.bytes, &content_type),
        }
    }

    /// Extract every document, skipping the ones that fail.
    ///
    /// A missing API credential is not a property of the document, so it
    /// stops the batch instead of skipping.
    pub async fn extract_all(&self, docs: &[Document]) -> Result<Extraction, ServiceError> {
        let mut out = Extraction::default();
        for doc in docs {
            match self.extract(doc).await {
                Ok(text) => {
                    tracing::debug!(name = %doc.name, chars = text.chars().count(), "extracted");
                    out.texts.push((doc.name.clone(), text));
                }
                Err(ExtractError::CredentialMissing(key)) => {
                    return Err(ServiceError::CredentialMissing(key));
                }
                Err(e) => {
                    tracing::warn!(name = %doc.name, error = %e, "skipping document");
                    out.skipped.push(SkippedDocument {
                        name: doc.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(out)
    }
}

/// Extract text from the locally parsed formats.
///
/// Unsupported content types yield an empty string rather than an error.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match normalize_content_type(content_type).as_str() {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        other => {
            tracing::warn!(content_type = %other, "unsupported content type, no text extracted");
            Ok(String::new())
        }
    }
}

fn decode_image(bytes: &[u8], content_type: &str) -> Result<(), ExtractError> {
    let format = if content_type == MIME_PNG {
        image::ImageFormat::Png
    } else {
        image::ImageFormat::Jpeg
    };
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ExtractError::Image(e.to_string()))?;
    tracing::debug!(width = img.width(), height = img.height(), "decoded image");
    Ok(())
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn xml_error(e: quick_xml::Error) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    if !has_entry(&archive, "word/document.xml") {
        return Err(ExtractError::Ooxml("word/document.xml not found".to_string()));
    }
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_paragraphs(&xml).map(|paragraphs| paragraphs.join("\n"))
}

/// Text of each `<w:p>`, runs concatenated, in document order.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => current.clear(),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Event::Text(te) if in_text => {
                current.push_str(&te.unescape().map_err(xml_error)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut lines = Vec::new();
    for name in worksheet_names(&archive).into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        lines.extend(sheet_rows(&sheet_xml, &shared_strings)?);
    }
    Ok(lines.join("\n"))
}

/// Shared string table; rich-text runs of one `<si>` are concatenated.
fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Event::Text(te) if in_t => current.push_str(&te.unescape().map_err(xml_error)?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Literal,
}

/// One line per non-empty `<row>`: its cell values joined by spaces.
fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut rows = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut value = String::new();
    let mut kind = CellKind::Literal;
    let mut in_value = false;
    let mut cell_count = 0usize;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            tracing::warn!(limit = XLSX_MAX_CELLS_PER_SHEET, "sheet cell limit reached");
            break;
        }
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => cells.clear(),
                b"c" => {
                    value.clear();
                    kind = CellKind::Literal;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Literal,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_value = true,
                _ => {}
            },
            Event::Text(te) if in_value => value.push_str(&te.unescape().map_err(xml_error)?),
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let text = match kind {
                        CellKind::Shared => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i))
                            .cloned()
                            .unwrap_or_default(),
                        CellKind::Inline | CellKind::Literal => value.trim().to_string(),
                    };
                    if !text.is_empty() {
                        cells.push(text);
                        cell_count += 1;
                    }
                }
                b"row" => {
                    if !cells.is_empty() {
                        rows.push(cells.join(" "));
                    }
                    cells.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
