//! Plain-text extraction for binary document formats.
//!
//! The loader hands over raw bytes plus the mime type it resolved from the
//! file extension; this module returns UTF-8 text or a
//! [`KnowledgeError::Extract`].

use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};

use quick_xml::events::Event;

use crate::error::{KnowledgeError, KnowledgeResult};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Upper bound on the decompressed size of `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// `true` if `mime_type` needs [`extract_text`] instead of a UTF-8 decode.
pub fn needs_extraction(mime_type: &str) -> bool {
    matches!(mime_type, MIME_PDF | MIME_DOCX)
}

pub fn extract_text(bytes: &[u8], mime_type: &str) -> KnowledgeResult<String> {
    match mime_type {
        MIME_PDF => contain_panics("pdf", || pdf_extract::extract_text_from_mem(bytes)),
        MIME_DOCX => extract_docx(bytes),
        other => Err(KnowledgeError::Extract(format!(
            "no extractor for content type {}",
            other
        ))),
    }
}

/// Run a third-party extractor, turning both its errors and its panics on
/// malformed input into [`KnowledgeError::Extract`].
fn contain_panics<T, E, F>(format: &str, extract: F) -> KnowledgeResult<T>
where
    E: std::fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    match panic::catch_unwind(AssertUnwindSafe(extract)) {
        Ok(result) => result.map_err(|e| KnowledgeError::Extract(format!("{}: {}", format, e))),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(KnowledgeError::Extract(format!(
                "{}: extractor panicked: {}",
                format, reason
            )))
        }
    }
}

fn extract_docx(bytes: &[u8]) -> KnowledgeResult<String> {
    let docx_err = |e: &dyn std::fmt::Display| KnowledgeError::Extract(format!("docx: {}", e));

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| docx_err(&e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| docx_err(&e))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| docx_err(&e))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(docx_err(&"word/document.xml exceeds size limit"));
    }

    paragraphs_from_wordml(&xml).map_err(|e| docx_err(&e))
}

/// Collect `<w:t>` runs, one paragraph per `<w:p>`, separated by blank lines.
fn paragraphs_from_wordml(xml: &[u8]) -> Result<String, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Event::Text(t) if in_text => {
                current.push_str(&t.unescape()?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn extractor_panic_becomes_extract_error() {
        let err = contain_panics("pdf", || -> Result<String, String> {
            panic!("unexpected object stream")
        })
        .unwrap_err();
        assert!(matches!(err, KnowledgeError::Extract(_)));
        assert!(err.to_string().contains("pdf: extractor panicked: unexpected object stream"));

        let err = contain_panics("pdf", || Err::<String, _>("bad xref")).unwrap_err();
        assert_eq!(err.to_string(), KnowledgeError::Extract("pdf: bad xref".into()).to_string());
        assert_eq!(contain_panics("pdf", || Ok::<_, String>(7)).unwrap(), 7);
    }

    #[test]
    fn docx_paragraphs_become_blank_line_separated() {
        let bytes = docx_with_paragraphs(&["First &amp; foremost.", "Second one."]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "First & foremost.\n\nSecond one.");
    }

    #[test]
    fn invalid_zip_is_an_error() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, KnowledgeError::Extract(_)));
    }

    #[test]
    fn invalid_pdf_is_an_error() {
        assert!(extract_text(b"not a pdf", MIME_PDF).is_err());
    }

    #[test]
    fn unknown_mime_is_an_error() {
        assert!(extract_text(b"hi", "text/plain").is_err());
        assert!(!needs_extraction("text/plain"));
        assert!(needs_extraction(MIME_PDF));
    }
}
