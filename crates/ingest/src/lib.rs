pub mod chunk;
pub mod chunker;
pub mod error;
pub mod reader;

pub use chunk::{Chunk, Page};
pub use chunker::{Chunker, ChunkerConfig};
pub use error::IngestionError;
pub use reader::{FileReader, PlainTextExtractor, SourceDocument, TextExtractor};

use sha2::{Digest, Sha256};

/// Generate a stable document ID from its name
pub fn generate_doc_id(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// A document split into pages and chunks, ready for indexing.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub doc_id: String,
    pub source: String,
    pub pages: usize,
    pub chunks: Vec<Chunk>,
}

/// Extract pages from raw bytes and chunk them.
pub async fn prepare_document(
    extractor: &dyn TextExtractor,
    chunker: &Chunker,
    name: &str,
    bytes: &[u8],
) -> Result<PreparedDocument, IngestionError> {
    let pages = extractor.extract_pages(name, bytes).await?;
    let doc_id = generate_doc_id(name);
    let chunks = chunker.chunk_pages(&doc_id, name, &pages);

    if chunks.is_empty() {
        return Err(IngestionError::Empty(name.to_string()));
    }

    tracing::debug!(doc_id = %doc_id, pages = pages.len(), chunks = chunks.len(), "Document prepared");

    Ok(PreparedDocument {
        doc_id,
        source: name.to_string(),
        pages: pages.len(),
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_document_attributes_pages() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let doc = prepare_document(
            &PlainTextExtractor,
            &chunker,
            "policy.txt",
            "RBI cut the repo rate.\u{000C}Banks will pass it on.".as_bytes(),
        )
        .await
        .unwrap();

        assert_eq!(doc.pages, 2);
        assert_eq!(doc.chunks.len(), 2);
        assert_eq!(doc.chunks[1].page, 2);
        assert_eq!(doc.doc_id, generate_doc_id("policy.txt"));
    }
}
