use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

use crate::chunk::Page;
use crate::error::IngestionError;

/// Page separator used by text exports of paginated documents.
const FORM_FEED: char = '\u{000C}';

const SUPPORTED_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

/// Turns raw document bytes into ordered, numbered pages.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_pages(&self, name: &str, bytes: &[u8]) -> Result<Vec<Page>, IngestionError>;
}

/// Extractor for plain text and markdown. Form feeds delimit pages.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract_pages(&self, name: &str, bytes: &[u8]) -> Result<Vec<Page>, IngestionError> {
        let extension = extension_of(Path::new(name));
        if !is_supported(&extension) {
            return Err(IngestionError::UnsupportedFormat(extension));
        }

        let text = std::str::from_utf8(bytes).map_err(|e| IngestionError::Unreadable {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let pages: Vec<Page> = text
            .split(FORM_FEED)
            .enumerate()
            .filter(|(_, page)| !page.trim().is_empty())
            .map(|(i, page)| Page {
                number: i as u32 + 1,
                text: page.to_string(),
            })
            .collect();

        if pages.is_empty() {
            return Err(IngestionError::Empty(name.to_string()));
        }

        Ok(pages)
    }
}

/// A document read from disk, not yet extracted.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<SourceDocument, IngestionError> {
        let extension = extension_of(path);
        if !is_supported(&extension) {
            return Err(IngestionError::UnsupportedFormat(extension));
        }

        let bytes = fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Ok(SourceDocument {
            name,
            path: path.to_path_buf(),
            bytes,
        })
    }

    /// Read every supported file below `dir`, sorted by path.
    pub async fn read_directory(dir: &Path) -> Result<Vec<SourceDocument>, IngestionError> {
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_supported(&extension_of(path)))
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            documents.push(Self::read_file(&path).await?);
        }

        Ok(documents)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn is_supported(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension)
}
