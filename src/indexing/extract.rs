use crate::core::error::{Error, Result};
use crate::indexing::discovery::ContentKind;
use crate::search::provider::Content;
use pulldown_cmark::{Event, Parser, TagEnd};
use std::path::Path;

/// Content prepared for embedding plus the text kept for previews
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub content: Content,
    pub text: Option<String>,
}

/// Read `path` as content of `kind`.
///
/// Text-bearing files with no non-whitespace text fail with `Extraction`;
/// callers treat that as "nothing to index".
pub fn extract(path: &Path, kind: ContentKind) -> Result<Extracted> {
    match kind {
        ContentKind::Text => {
            let text = read_text(path)?;
            Ok(Extracted {
                content: Content::Text(text.clone()),
                text: Some(text),
            })
        }
        ContentKind::Markdown => {
            let raw = read_text(path)?;
            let plain = markdown_to_plain_text(&raw);
            if plain.trim().is_empty() {
                return Err(empty(path));
            }
            Ok(Extracted {
                content: Content::Text(plain),
                text: Some(raw),
            })
        }
        ContentKind::Pdf => {
            let text = extract_pdf_text(path)?;
            Ok(Extracted {
                content: Content::Text(text.clone()),
                text: Some(text),
            })
        }
        ContentKind::Image => Ok(Extracted {
            content: Content::Image(read_bytes(path)?),
            text: None,
        }),
        ContentKind::Audio => Ok(Extracted {
            content: Content::Audio(read_bytes(path)?),
            text: None,
        }),
    }
}

/// Preview text for a text-bearing file, `None` for other kinds or on failure
pub fn extract_text(path: &Path) -> Option<String> {
    let kind = ContentKind::from_path(path)?;
    if !kind.has_text() {
        return None;
    }
    extract(path, kind).ok().and_then(|e| e.text)
}

/// Lossy UTF-8 read of a plain text file
fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Extraction(format!("{}: {}", path.display(), e)))?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.trim().is_empty() {
        return Err(empty(path));
    }
    Ok(text)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Extraction(format!("{}: {}", path.display(), e)))?;
    if bytes.is_empty() {
        return Err(empty(path));
    }
    Ok(bytes)
}

fn extract_pdf_text(path: &Path) -> Result<String> {
    // pdf-extract panics on some malformed documents
    let outcome = std::panic::catch_unwind(|| pdf_extract::extract_text(path)).map_err(|_| {
        Error::Extraction(format!("{}: PDF extraction panicked", path.display()))
    })?;
    let text = outcome
        .map_err(|e| Error::Extraction(format!("{}: PDF extraction failed: {}", path.display(), e)))?;
    if text.trim().is_empty() {
        return Err(empty(path));
    }
    Ok(text)
}

fn empty(path: &Path) -> Error {
    Error::Extraction(format!("{}: no content", path.display()))
}

/// Strip Markdown syntax, keeping headings, paragraphs, list items and code as text.
pub fn markdown_to_plain_text(content: &str) -> String {
    let body = strip_frontmatter(content);
    let mut out = String::with_capacity(body.len());

    for event in Parser::new(body) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::CodeBlock) => out.push('\n'),
            _ => {}
        }
    }

    out.trim().to_string()
}

/// Drop a leading YAML block between `---` markers
fn strip_frontmatter(content: &str) -> &str {
    if let Some(rest) = content.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            return &rest[end + 5..];
        }
    }
    content
}
