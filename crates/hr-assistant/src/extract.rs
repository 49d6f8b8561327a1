//! Text extraction for policy documents.
//!
//! Turns raw file bytes into plain UTF-8 text according to the
//! [`DocumentKind`]. PDFs go through `pdf-extract`; plain text and Markdown
//! are decoded as UTF-8 (lossily, so a stray byte does not reject the
//! whole file). All output is passed through [`clean_text`].

use hr_assistant_core::models::DocumentKind;

/// Private-use glyph that PDF bullet lists often extract to.
const PDF_BULLET: char = '\u{f0b7}';

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Empty,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Empty => write!(f, "document contains no extractable text"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract cleaned text. Fails with [`ExtractError::Empty`] when nothing
/// but whitespace remains.
pub fn extract_text(kind: DocumentKind, bytes: &[u8]) -> Result<String, ExtractError> {
    let raw = match kind {
        DocumentKind::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?
        }
        DocumentKind::PlainText | DocumentKind::Markdown => String::from_utf8_lossy(bytes).into_owned(),
    };
    let text = clean_text(&raw);
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

/// Remove extraction artifacts while keeping paragraph structure.
///
/// Drops NUL bytes, maps the PDF bullet glyph to `•`, normalizes line
/// endings, strips trailing spaces, and collapses runs of blank lines to one.
pub fn clean_text(raw: &str) -> String {
    let normalized = raw
        .replace('\0', "")
        .replace(PDF_BULLET, "•")
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    let mut out = String::with_capacity(normalized.len());
    let mut blank_run = 0usize;
    for line in normalized.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = 0;
    }
    out
}
