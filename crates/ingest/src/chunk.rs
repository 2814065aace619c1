use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One page of extracted text, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    pub source: String,
    pub page: u32,
    pub offset: (usize, usize), // [start, end) byte positions within the page
}

impl Chunk {
    pub fn new(
        doc_id: String,
        text: String,
        source: String,
        page: u32,
        offset: (usize, usize),
    ) -> Self {
        // Generate stable chunk_id from content and position
        let chunk_id = Self::generate_chunk_id(&doc_id, page, &text, offset);

        Self {
            doc_id,
            chunk_id,
            text,
            source,
            page,
            offset,
        }
    }

    fn generate_chunk_id(doc_id: &str, page: u32, text: &str, offset: (usize, usize)) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(page.to_le_bytes());
        hasher.update(text.as_bytes());
        hasher.update(offset.0.to_string().as_bytes());
        hasher.update(offset.1.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    /// Number of characters, the unit chunk size and context budgets are measured in.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_stable() {
        let a = Chunk::new("doc".into(), "hello".into(), "a.txt".into(), 1, (0, 5));
        let b = Chunk::new("doc".into(), "hello".into(), "a.txt".into(), 1, (0, 5));
        let c = Chunk::new("doc".into(), "hello".into(), "a.txt".into(), 2, (0, 5));

        assert_eq!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
        assert_eq!(a.chunk_id.len(), 32);
    }
}
