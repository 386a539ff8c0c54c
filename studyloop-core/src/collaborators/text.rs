//! Document text extraction
//!
//! Reads UTF-8 documents or PDFs and splits them into paragraph-aligned
//! chunks. PDF pages are read in page order and joined with a blank line,
//! so each page starts a new paragraph. Other binary input is rejected.

use std::path::Path;

use async_trait::async_trait;
use lopdf::Document;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_CHUNK_CHARS;

use super::{ExtractionRequest, ExtractionResponse, Extractor};

/// Upper bound on summary length in characters
const SUMMARY_CHARS: usize = 300;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone)]
pub struct TextExtractor {
    max_chunk_chars: usize,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS)
    }
}

impl TextExtractor {
    pub fn new(max_chunk_chars: usize) -> Self {
        Self {
            max_chunk_chars: max_chunk_chars.max(1),
        }
    }

    pub fn max_chunk_chars(&self) -> usize {
        self.max_chunk_chars
    }

    async fn read_text(&self, request: &ExtractionRequest) -> Result<String, String> {
        let pdf_hinted = is_pdf_hint(request.file_type.as_deref());

        if let Some(content) = &request.file_content {
            if pdf_hinted || content.as_bytes().starts_with(PDF_MAGIC) {
                return pdf_text(content.clone().into_bytes()).await;
            }
            return Ok(content.clone());
        }

        let Some(path) = &request.file_path else {
            return Err("Either file_path or file_content must be provided".into());
        };

        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => format!("File not found: {}", path.display()),
            _ => format!("Failed to read {}: {}", path.display(), e),
        })?;

        let extension = extension_of(path);
        if pdf_hinted || is_pdf_hint(extension.as_deref()) || bytes.starts_with(PDF_MAGIC) {
            return pdf_text(bytes).await;
        }

        String::from_utf8(bytes).map_err(|_| {
            format!(
                "Unsupported file type: {} is not UTF-8 text",
                extension.map_or_else(|| path.display().to_string(), |ext| format!(".{ext}"))
            )
        })
    }

    /// Split text into chunks of at most `max_chunk_chars` characters
    ///
    /// Paragraphs (blank-line separated) are packed together while they
    /// fit; an oversized paragraph is split on whitespace, and an
    /// oversized word is split on character boundaries.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let max = self.max_chunk_chars;
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for paragraph in paragraphs(text) {
            let len = paragraph.chars().count();
            if len > max {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                chunks.extend(split_long(&paragraph, max));
                continue;
            }

            let joined_len = if current.is_empty() { len } else { current_len + 2 + len };
            if joined_len > max {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push_str("\n\n");
                current_len += 2;
            }
            current.push_str(&paragraph);
            current_len += len;
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

#[async_trait]
impl Extractor for TextExtractor {
    async fn extract(&self, request: ExtractionRequest) -> ExtractionResponse {
        let text = match self.read_text(&request).await {
            Ok(text) => text,
            Err(error) => {
                debug!(%error, "Extraction rejected");
                return ExtractionResponse::failed(error);
            }
        };

        let chunks = self.chunk(&text);
        if chunks.is_empty() {
            return ExtractionResponse::failed("Document contains no text");
        }

        let summary = summarize(&chunks[0]);
        info!(
            chunks = chunks.len(),
            chars = text.chars().count(),
            "Extracted text"
        );
        ExtractionResponse::ok(chunks, Some(summary))
    }
}

/// Parse a PDF off the async runtime
async fn pdf_text(bytes: Vec<u8>) -> Result<String, String> {
    tokio::task::spawn_blocking(move || pdf_pages_text(&bytes))
        .await
        .map_err(|e| format!("PDF extraction task failed: {e}"))?
}

/// Text of every page in page order, pages separated by a blank line
fn pdf_pages_text(bytes: &[u8]) -> Result<String, String> {
    let document =
        Document::load_mem(bytes).map_err(|e| format!("Failed to read PDF: {e}"))?;

    let mut pages = Vec::new();
    for page_number in document.get_pages().into_keys() {
        match document.extract_text(&[page_number]) {
            Ok(text) if !text.trim().is_empty() => pages.push(text),
            Ok(_) => {}
            Err(e) => warn!(page = page_number, error = %e, "Skipping unreadable PDF page"),
        }
    }
    debug!(pages = pages.len(), "Read PDF text");
    Ok(pages.join("\n\n"))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn is_pdf_hint(hint: Option<&str>) -> bool {
    hint.is_some_and(|h| {
        let h = h.trim().trim_start_matches('.');
        h.eq_ignore_ascii_case("pdf") || h.eq_ignore_ascii_case("application/pdf")
    })
}

/// Blank-line separated paragraphs with inner whitespace collapsed
fn paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

fn split_long(paragraph: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in paragraph.split(' ') {
        let len = word.chars().count();
        if len > max {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max).map(|c| c.iter().collect::<String>()));
            continue;
        }

        let joined_len = if current.is_empty() { len } else { current_len + 1 + len };
        if joined_len > max {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += len;
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Leading text of the first chunk, cut at a word boundary
fn summarize(first_chunk: &str) -> String {
    let flat = first_chunk.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SUMMARY_CHARS {
        return flat;
    }

    let cut: String = flat.chars().take(SUMMARY_CHARS).collect();
    let trimmed = match cut.rfind(' ') {
        Some(idx) if idx > 0 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}...", trimmed.trim_end_matches(|c: char| c.is_ascii_punctuation()))
}
