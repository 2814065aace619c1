use crate::chunk::{Chunk, Page};

/// Preferred split points, strongest first.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks of the same page.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk_pages(&self, doc_id: &str, source: &str, pages: &[Page]) -> Vec<Chunk> {
        pages
            .iter()
            .flat_map(|page| self.chunk_page(doc_id, source, page))
            .collect()
    }

    pub fn chunk_page(&self, doc_id: &str, source: &str, page: &Page) -> Vec<Chunk> {
        let text = page.text.as_str();

        self.split_spans(text)
            .into_iter()
            .filter_map(|(start, end)| {
                let raw = &text[start..end];
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return None;
                }
                let lead = raw.len() - raw.trim_start().len();
                Some(Chunk::new(
                    doc_id.to_string(),
                    trimmed.to_string(),
                    source.to_string(),
                    page.number,
                    (start + lead, start + lead + trimmed.len()),
                ))
            })
            .collect()
    }

    /// Byte spans of each window. Windows hold at most `chunk_size` characters
    /// and end on the strongest separator found in their second half.
    fn split_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = bounds.len() - 1;
        let size = self.config.chunk_size.max(1);
        let overlap = self.config.chunk_overlap.min(size - 1);

        let mut spans = Vec::new();
        if total == 0 {
            return spans;
        }

        let mut start = 0;
        loop {
            let hard_end = (start + size).min(total);
            let end = if hard_end == total {
                hard_end
            } else {
                Self::soft_boundary(text, &bounds, start + size / 2, hard_end)
            };
            spans.push((bounds[start], bounds[end]));

            if end >= total {
                break;
            }

            // Overlap starts on a word boundary so no chunk opens mid-word
            let mut next = end.saturating_sub(overlap).max(start + 1);
            while next < end && !Self::follows_whitespace(text, &bounds, next) {
                next += 1;
            }
            start = next;
        }

        spans
    }

    fn soft_boundary(text: &str, bounds: &[usize], min: usize, hard_end: usize) -> usize {
        let window = &text[bounds[min]..bounds[hard_end]];

        for separator in SEPARATORS {
            if let Some(pos) = window.rfind(separator) {
                let byte = bounds[min] + pos + separator.len();
                if let Ok(index) = bounds.binary_search(&byte) {
                    if index > min {
                        return index;
                    }
                }
            }
        }

        hard_end
    }

    fn follows_whitespace(text: &str, bounds: &[usize], index: usize) -> bool {
        text[bounds[index - 1]..bounds[index]]
            .chars()
            .all(char::is_whitespace)
    }
}
