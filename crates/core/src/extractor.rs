use crate::config::RagConfig;
use crate::error::DocumentLoadError;
use crate::models::{DocumentFingerprint, PageText};
use crate::traits::DocumentSource;
use chrono::Utc;
use lopdf::Document;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub enum DocumentInput {
    Path(PathBuf),
    /// Uploaded content; `name` is used as the source id and for format detection.
    Bytes { name: String, bytes: Vec<u8> },
}

impl DocumentInput {
    pub fn source_id(&self) -> String {
        match self {
            Self::Path(path) => path.to_string_lossy().to_string(),
            Self::Bytes { name, .. } => name.clone(),
        }
    }

    fn title(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| self.source_id()),
            Self::Bytes { name, .. } => name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub fingerprint: DocumentFingerprint,
    pub pages: Vec<PageText>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pdf,
    PlainText,
}

pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 200 * 1024 * 1024;

/// Loads PDF and plain-text leases. Plain text uses form feeds as page breaks.
#[derive(Debug, Clone, Copy)]
pub struct LeaseDocumentLoader {
    max_bytes: u64,
}

impl Default for LeaseDocumentLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DOCUMENT_BYTES)
    }
}

impl From<&RagConfig> for LeaseDocumentLoader {
    fn from(config: &RagConfig) -> Self {
        Self::new(config.max_document_bytes)
    }
}

impl LeaseDocumentLoader {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn check_size(&self, source_id: &str, size: u64) -> Result<(), DocumentLoadError> {
        if size > self.max_bytes {
            return Err(DocumentLoadError::TooLarge {
                source_id: source_id.to_string(),
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

impl DocumentSource for LeaseDocumentLoader {
    fn load(&self, input: &DocumentInput) -> Result<LoadedDocument, DocumentLoadError> {
        let source_id = input.source_id();
        let bytes = match input {
            DocumentInput::Path(path) => {
                let io_error = |source| DocumentLoadError::Io {
                    path: path.display().to_string(),
                    source,
                };
                let size = std::fs::metadata(path).map_err(io_error)?.len();
                self.check_size(&source_id, size)?;
                std::fs::read(path).map_err(io_error)?
            }
            DocumentInput::Bytes { bytes, .. } => {
                self.check_size(&source_id, bytes.len() as u64)?;
                bytes.clone()
            }
        };

        let pages = match detect_format(&source_id, &bytes)? {
            Format::Pdf => extract_pdf_pages(&bytes, &source_id)?,
            Format::PlainText => split_text_pages(&String::from_utf8_lossy(&bytes)),
        };

        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(DocumentLoadError::NoText(source_id));
        }

        Ok(LoadedDocument {
            fingerprint: DocumentFingerprint {
                source_id,
                title: input.title(),
                checksum: digest_bytes(&bytes),
                page_count: pages.len(),
                ingested_at: Utc::now(),
            },
            pages,
        })
    }
}

fn detect_format(source_id: &str, bytes: &[u8]) -> Result<Format, DocumentLoadError> {
    if bytes.starts_with(b"%PDF-") {
        return Ok(Format::Pdf);
    }

    let extension = Path::new(source_id)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("pdf") => Ok(Format::Pdf),
        Some("txt") | Some("text") | Some("md") => Ok(Format::PlainText),
        _ => Err(DocumentLoadError::UnsupportedFormat(source_id.to_string())),
    }
}

fn extract_pdf_pages(bytes: &[u8], source_id: &str) -> Result<Vec<PageText>, DocumentLoadError> {
    let document = Document::load_mem(bytes).map_err(|error| DocumentLoadError::PdfParse {
        source_id: source_id.to_string(),
        details: error.to_string(),
    })?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| DocumentLoadError::PdfParse {
                source_id: source_id.to_string(),
                details: format!("page {page_no}: {error}"),
            })?;
        pages.push(PageText::new(page_no, text));
    }

    Ok(pages)
}

/// Form-feed separated pages, numbered from 1. Text without form feeds is a
/// single page.
pub fn split_text_pages(text: &str) -> Vec<PageText> {
    text.split('\u{000c}')
        .enumerate()
        .map(|(index, page)| PageText::new(index as u32 + 1, page))
        .collect()
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn form_feed_splits_pages_in_order() {
        let pages = split_text_pages("Rent clause\u{000C}Pet clause\n");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0], PageText::new(1, "Rent clause"));
        assert_eq!(pages[1].number, Some(2));
        assert_eq!(pages[1].text, "Pet clause\n");
    }

    #[test]
    fn text_file_loads_with_fingerprint() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("lease.txt");
        fs::write(&path, "The monthly rent is $1500.\u{000C}No pets.")?;

        let loaded = LeaseDocumentLoader::default().load(&DocumentInput::Path(path.clone()))?;
        assert_eq!(loaded.pages.len(), 2);
        assert_eq!(loaded.fingerprint.title, "lease.txt");
        assert_eq!(loaded.fingerprint.page_count, 2);
        assert_eq!(loaded.fingerprint.source_id, path.to_string_lossy());
        assert_eq!(loaded.fingerprint.checksum.len(), 64);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), DocumentLoadError> {
        let input = DocumentInput::Bytes {
            name: "lease.md".to_string(),
            bytes: b"Rent is due monthly.".to_vec(),
        };
        let first = LeaseDocumentLoader::default().load(&input)?;
        let second = LeaseDocumentLoader::default().load(&input)?;
        assert_eq!(first.fingerprint.checksum, second.fingerprint.checksum);
        Ok(())
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let input = DocumentInput::Bytes {
            name: "lease.docx".to_string(),
            bytes: b"PK\x03\x04".to_vec(),
        };
        assert!(matches!(
            LeaseDocumentLoader::default().load(&input),
            Err(DocumentLoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn broken_pdf_is_a_parse_error() {
        let input = DocumentInput::Bytes {
            name: "upload".to_string(),
            bytes: b"%PDF-1.4\n%broken".to_vec(),
        };
        assert!(matches!(
            LeaseDocumentLoader::default().load(&input),
            Err(DocumentLoadError::PdfParse { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let input = DocumentInput::Path(dir.path().join("absent.pdf"));
        assert!(matches!(
            LeaseDocumentLoader::default().load(&input),
            Err(DocumentLoadError::Io { .. })
        ));
        Ok(())
    }

    #[test]
    fn documents_over_the_limit_are_refused() -> Result<(), Box<dyn std::error::Error>> {
        let loader = LeaseDocumentLoader::new(16);
        let input = DocumentInput::Bytes {
            name: "lease.txt".to_string(),
            bytes: b"The monthly rent is $1500.".to_vec(),
        };
        assert!(matches!(
            loader.load(&input),
            Err(DocumentLoadError::TooLarge { size: 26, limit: 16, .. })
        ));

        let dir = tempdir()?;
        let path = dir.path().join("lease.txt");
        fs::write(&path, "The monthly rent is $1500.")?;
        assert!(matches!(
            loader.load(&DocumentInput::Path(path.clone())),
            Err(DocumentLoadError::TooLarge { .. })
        ));
        assert!(LeaseDocumentLoader::new(26).load(&DocumentInput::Path(path)).is_ok());
        Ok(())
    }

    #[test]
    fn loader_limit_follows_the_config() {
        let config = RagConfig {
            max_document_bytes: 1024,
            ..RagConfig::default()
        };
        assert_eq!(LeaseDocumentLoader::from(&config).max_bytes(), 1024);
        assert_eq!(
            LeaseDocumentLoader::default().max_bytes(),
            RagConfig::default().max_document_bytes
        );
    }

    #[test]
    fn blank_text_has_no_readable_text() {
        let input = DocumentInput::Bytes {
            name: "blank.txt".to_string(),
            bytes: b"   \n\x0c  ".to_vec(),
        };
        assert!(matches!(
            LeaseDocumentLoader::default().load(&input),
            Err(DocumentLoadError::NoText(_))
        ));
    }
}
