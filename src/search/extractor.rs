//! Plain-text extraction from submission files.
//!
//! Extraction degrades to an empty string on any failure: indexing must never
//! break the host event that triggered it.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use tracing::warn;

use crate::SubmissionFileRef;

/// Chunked plain-text reader for one file format: a finite sequence of text
/// chunks, read once per open.
pub trait SearchFileParser: Send {
    /// Prepare the file for reading; `false` when it cannot be opened.
    fn open(&mut self) -> bool;

    /// Next chunk of plain text, or `None` at end of input.
    fn read(&mut self) -> Option<String>;

    fn close(&mut self);
}

/// Chooses a parser for a submission file, or `None` when the format is not
/// indexable.
pub trait FileParserFactory: Send + Sync {
    fn from_file(&self, file: &SubmissionFileRef) -> Option<Box<dyn SearchFileParser>>;
}

/// Extract the full plain text of `file`, chunks stitched with single spaces.
pub fn extract_text(factory: &dyn FileParserFactory, file: &SubmissionFileRef) -> String {
    let Some(mut parser) = factory.from_file(file) else {
        return String::new();
    };
    if !parser.open() {
        return String::new();
    }
    let mut chunks = Vec::new();
    while let Some(chunk) = parser.read() {
        chunks.push(chunk);
    }
    parser.close();
    chunks.join(" ").trim().to_string()
}

/// Default parser: reads the file as UTF-8 text, one line per chunk.
pub struct PlainTextParser {
    path: PathBuf,
    reader: Option<BufReader<File>>,
}

impl PlainTextParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), reader: None }
    }
}

impl SearchFileParser for PlainTextParser {
    fn open(&mut self) -> bool {
        match File::open(&self.path) {
            Ok(file) => {
                self.reader = Some(BufReader::new(file));
                true
            }
            Err(err) => {
                warn!("cannot open {} for text extraction: {err}", self.path.display());
                false
            }
        }
    }

    fn read(&mut self) -> Option<String> {
        let reader = self.reader.as_mut()?;
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(err) => {
                warn!("read error in {}: {err}", self.path.display());
                None
            }
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Parser selection by MIME type: plain-text formats are indexed, everything
/// else is skipped.
pub struct DefaultParserFactory;

impl FileParserFactory for DefaultParserFactory {
    fn from_file(&self, file: &SubmissionFileRef) -> Option<Box<dyn SearchFileParser>> {
        let mime = file.mime_type.as_deref().unwrap_or("");
        let is_text = mime.starts_with("text/")
            || file.path.extension().is_some_and(|ext| ext == "txt");
        if is_text {
            Some(Box::new(PlainTextParser::new(&file.path)))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_ref(path: PathBuf, mime_type: &str) -> SubmissionFileRef {
        SubmissionFileRef {
            id: 1,
            submission_id: 1,
            file_stage: crate::FILE_STAGE_PROOF,
            path,
            mime_type: Some(mime_type.to_string()),
        }
    }

    #[test]
    fn extracts_and_stitches_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("galley.txt");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "first line").unwrap();
        writeln!(file, "second line").unwrap();

        let text = extract_text(&DefaultParserFactory, &file_ref(path, "text/plain"));
        assert_eq!(text, "first line\n second line");
    }

    #[test]
    fn missing_file_yields_empty_text() {
        let file = file_ref(PathBuf::from("/nonexistent/galley.txt"), "text/plain");
        assert_eq!(extract_text(&DefaultParserFactory, &file), "");
    }

    #[test]
    fn unsupported_format_yields_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("galley.pdf");
        File::create(&path).unwrap();
        let file = file_ref(path, "application/pdf");
        assert_eq!(extract_text(&DefaultParserFactory, &file), "");
    }

    #[test]
    fn parser_reads_once_per_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("galley.txt");
        std::fs::write(&path, "only line").unwrap();

        let mut parser = PlainTextParser::new(&path);
        assert!(parser.open());
        assert_eq!(parser.read().as_deref(), Some("only line"));
        assert_eq!(parser.read(), None);
        parser.close();
        assert_eq!(parser.read(), None);
    }
}
