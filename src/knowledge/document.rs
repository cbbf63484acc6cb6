//! Source documents and the readers that produce them

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::path::{Path, PathBuf};

/// Source format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Csv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

/// A loaded source unit. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: PathBuf,
    pub media_type: MediaType,
    pub text: String,
    /// 1-based page number for paginated sources
    pub page: Option<usize>,
    /// Byte offset of each tabular row inside `text`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub row_offsets: Vec<usize>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<PathBuf>,
        media_type: MediaType,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            media_type,
            text: text.into(),
            page: None,
            row_offsets: Vec::new(),
        }
    }

    /// Metadata every chunk of this document inherits
    pub fn metadata(&self) -> Map<String, JsonValue> {
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), json!(self.source.display().to_string()));
        metadata.insert("media_type".to_string(), json!(self.media_type.as_str()));
        if let Some(page) = self.page {
            metadata.insert("page".to_string(), json!(page));
        }
        metadata
    }

    /// 1-based inclusive row range covered by the byte span `start..end`
    pub fn row_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if self.row_offsets.is_empty() || start >= end {
            return None;
        }
        let first = self.row_offsets.partition_point(|&o| o <= start).max(1);
        let last = self.row_offsets.partition_point(|&o| o < end).max(first);
        Some((first, last))
    }
}

/// Turns one file into documents
pub trait DocumentReader: Send + Sync {
    fn media_type(&self) -> MediaType;

    fn read(&self, path: &Path) -> Result<Vec<Document>>;
}

/// Reader for a media type
pub fn reader_for(media_type: MediaType) -> Box<dyn DocumentReader> {
    match media_type {
        MediaType::Pdf => Box::new(PdfReader),
        MediaType::Csv => Box::new(CsvReader),
    }
}

/// File stem usable as a document id prefix
fn document_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace(char::is_whitespace, "_"))
        .unwrap_or_else(|| "document".to_string())
}

/// One document per non-empty page, id `{stem}_{page}`
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfReader;

impl PdfReader {
    /// Split extracted text on form feeds, which separate pages
    pub fn pages_to_documents(path: &Path, text: &str) -> Vec<Document> {
        let stem = document_stem(path);
        text.split('\x0c')
            .enumerate()
            .filter_map(|(idx, page)| {
                let trimmed = page.trim();
                if trimmed.is_empty() {
                    return None;
                }
                let number = idx + 1;
                let mut doc = Document::new(
                    format!("{}_{}", stem, number),
                    path,
                    MediaType::Pdf,
                    trimmed,
                );
                doc.page = Some(number);
                Some(doc)
            })
            .collect()
    }
}

impl DocumentReader for PdfReader {
    fn media_type(&self) -> MediaType {
        MediaType::Pdf
    }

    fn read(&self, path: &Path) -> Result<Vec<Document>> {
        let text = pdf_extract::extract_text(path)
            .with_context(|| format!("Failed to extract PDF text from {}", path.display()))?;
        Ok(Self::pages_to_documents(path, &text))
    }
}

/// One document per file, one `header: value, ...` line per row
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvReader;

impl CsvReader {
    pub fn from_reader<R: std::io::Read>(path: &Path, input: R) -> Result<Option<Document>> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header of {}", path.display()))?
            .clone();

        let mut text = String::new();
        let mut row_offsets = Vec::new();
        for (idx, row) in reader.records().enumerate() {
            let row = row.with_context(|| format!("{}: bad row {}", path.display(), idx + 1))?;
            let line = headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| format!("{}: {}", h.trim(), v.trim()))
                .collect::<Vec<_>>()
                .join(", ");
            if line.is_empty() {
                continue;
            }
            row_offsets.push(text.len());
            text.push_str(&line);
            text.push('\n');
        }

        if row_offsets.is_empty() {
            return Ok(None);
        }

        let mut doc = Document::new(document_stem(path), path, MediaType::Csv, text);
        doc.row_offsets = row_offsets;
        Ok(Some(doc))
    }
}

impl DocumentReader for CsvReader {
    fn media_type(&self) -> MediaType {
        MediaType::Csv
    }

    fn read(&self, path: &Path) -> Result<Vec<Document>> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self::from_reader(path, file)?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_pages_become_documents() {
        let path = Path::new("/kb/Lean SEO.pdf");
        let docs = PdfReader::pages_to_documents(path, "Intro\x0c  \x0cKeywords matter");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "Lean_SEO_1");
        assert_eq!(docs[1].id, "Lean_SEO_3");
        assert_eq!(docs[1].page, Some(3));
        assert_eq!(docs[1].metadata()["media_type"], json!("pdf"));
    }

    #[test]
    fn test_csv_rows_render_with_offsets() {
        let input = "keyword,volume\nlean seo,1200\nseo audit,800\n";
        let doc = CsvReader::from_reader(Path::new("webdata.csv"), input.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(doc.id, "webdata");
        assert_eq!(doc.text, "keyword: lean seo, volume: 1200\nkeyword: seo audit, volume: 800\n");
        assert_eq!(doc.row_offsets, vec![0, 32]);
        assert_eq!(doc.row_range(0, 10), Some((1, 1)));
        assert_eq!(doc.row_range(0, doc.text.len()), Some((1, 2)));
        assert_eq!(doc.row_range(40, 50), Some((2, 2)));
    }

    #[test]
    fn test_empty_csv_yields_nothing() {
        let doc = CsvReader::from_reader(Path::new("empty.csv"), "a,b\n".as_bytes()).unwrap();
        assert!(doc.is_none());
    }

    #[test]
    fn test_missing_csv_is_error() {
        assert!(CsvReader.read(Path::new("/definitely/not/here.csv")).is_err());
    }
}
