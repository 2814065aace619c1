pub mod cache;
pub mod embeddings;
pub mod graph;
pub mod neo4j_index;
pub mod qdrant_index;
pub mod retry;
pub mod vector;

pub use cache::CachedEmbedder;
pub use embeddings::{EmbeddingClient, EmbeddingProvider};
pub use graph::{GraphStats, GraphStore, KnowledgeGraph, Subgraph};
pub use neo4j_index::Neo4jGraphStore;
pub use qdrant_index::QdrantIndex;
pub use retry::RetryPolicy;
pub use vector::{cosine_similarity, MemoryVectorIndex, ScoredChunk, VectorIndex};

use extract::{with_timeout, ExtractionProvider, ProviderError, ProviderKind};
use ingest::{Chunker, ChunkerConfig, FileReader, IngestionError, TextExtractor};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Per-document outcome of an ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub source: String,
    pub pages: usize,
    pub chunks: usize,
    pub entities: usize,
    pub relationships: usize,
    /// Chunks whose entity extraction failed and were indexed for vectors only.
    pub extraction_failures: usize,
}

#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub chunks: usize,
    pub graph: GraphStats,
}

pub struct IndexerOptions {
    pub chunker: ChunkerConfig,
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,
    /// Run entity extraction and populate the graph store.
    pub build_graph: bool,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            provider_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            build_graph: true,
        }
    }
}

/// Writes documents into both the vector index and the graph store.
/// Ingestions holding the same write lock are serialized; queries keep
/// reading the stores meanwhile.
pub struct Indexer {
    text_extractor: Arc<dyn TextExtractor>,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    extractor: Arc<dyn ExtractionProvider>,
    timeout: Duration,
    retry: RetryPolicy,
    build_graph: bool,
    write_lock: Arc<Mutex<()>>,
}

impl Indexer {
    pub fn new(
        text_extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        extractor: Arc<dyn ExtractionProvider>,
        options: IndexerOptions,
    ) -> Self {
        Self {
            text_extractor,
            chunker: Chunker::new(options.chunker),
            embedder,
            vectors,
            graph,
            extractor,
            timeout: options.provider_timeout,
            retry: options.retry,
            build_graph: options.build_graph,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Share a write lock with other indexers over the same stores.
    pub fn with_write_lock(mut self, write_lock: Arc<Mutex<()>>) -> Self {
        self.write_lock = write_lock;
        self
    }

    /// Ingest one document given its name (for format detection) and bytes.
    pub async fn ingest_document(&self, name: &str, bytes: &[u8]) -> Result<IngestReport, IndexError> {
        let _guard = self.write_lock.lock().await;

        let doc = ingest::prepare_document(self.text_extractor.as_ref(), &self.chunker, name, bytes).await?;
        info!(doc_id = %doc.doc_id, source = %doc.source, pages = doc.pages, chunks = doc.chunks.len(), "Indexing document");

        // Embed everything before the first write so a failing embedder
        // leaves the index untouched
        let mut vectors = Vec::with_capacity(doc.chunks.len());
        for chunk in &doc.chunks {
            let vector = self
                .retry
                .retry("embed_chunk", || {
                    with_timeout(ProviderKind::Embedding, self.timeout, self.embedder.embed(&chunk.text))
                })
                .await?;
            vectors.push(vector);
        }

        let mut extractions = Vec::new();
        let mut extraction_failures = 0;
        if self.build_graph {
            for chunk in &doc.chunks {
                match with_timeout(ProviderKind::Extraction, self.timeout, self.extractor.extract(&chunk.text)).await {
                    Ok(extraction) => extractions.push((chunk, extraction)),
                    Err(e) => {
                        // Chunk stays searchable by vector; graph just misses its facts
                        warn!(chunk_id = %chunk.chunk_id, error = %e, "Entity extraction failed");
                        extraction_failures += 1;
                    }
                }
            }
        }

        for (chunk, vector) in doc.chunks.iter().zip(vectors) {
            self.retry
                .retry("add_chunk", || {
                    with_timeout(
                        ProviderKind::VectorIndex,
                        self.timeout,
                        self.vectors.add(chunk.clone(), vector.clone()),
                    )
                })
                .await?;
        }

        let mut report = IngestReport {
            doc_id: doc.doc_id.clone(),
            source: doc.source.clone(),
            pages: doc.pages,
            chunks: doc.chunks.len(),
            entities: 0,
            relationships: 0,
            extraction_failures,
        };

        for (chunk, extraction) in extractions {
            for entity in extraction.entities {
                let entity = entity.with_property("source", chunk.source.clone());
                self.retry
                    .retry("upsert_entity", || {
                        with_timeout(ProviderKind::GraphStore, self.timeout, self.graph.upsert_entity(entity.clone()))
                    })
                    .await?;
                report.entities += 1;
            }

            for relationship in extraction.relationships {
                self.retry
                    .retry("upsert_relationship", || {
                        with_timeout(
                            ProviderKind::GraphStore,
                            self.timeout,
                            self.graph.upsert_relationship(relationship.clone()),
                        )
                    })
                    .await?;
                report.relationships += 1;
            }
        }

        info!(
            doc_id = %report.doc_id,
            entities = report.entities,
            relationships = report.relationships,
            extraction_failures = report.extraction_failures,
            "Document indexed"
        );

        Ok(report)
    }

    /// Ingest a file, or every supported file below a directory.
    pub async fn ingest_path(&self, path: &Path) -> Result<Vec<IngestReport>, IndexError> {
        let documents = if path.is_dir() {
            FileReader::read_directory(path).await?
        } else {
            vec![FileReader::read_file(path).await?]
        };

        let mut reports = Vec::with_capacity(documents.len());
        for document in documents {
            reports.push(self.ingest_document(&document.name, &document.bytes).await?);
        }
        Ok(reports)
    }

    /// Get overall stats
    pub async fn get_stats(&self) -> Result<IndexStats, ProviderError> {
        Ok(IndexStats {
            chunks: self.vectors.len().await?,
            graph: self.graph.stats().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use extract::{Entity, ExtractionResult, Relationship};
    use ingest::PlainTextExtractor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    /// Fails on chunks mentioning "broken", otherwise yields one fixed triple.
    struct FixedExtractor;

    #[async_trait]
    impl ExtractionProvider for FixedExtractor {
        async fn extract(&self, text: &str) -> Result<ExtractionResult, ProviderError> {
            if text.contains("broken") {
                return Err(ProviderError::failed(ProviderKind::Extraction, "model error"));
            }
            Ok(ExtractionResult {
                entities: vec![Entity::new("RBI", "organization"), Entity::new("Repo Rate", "concept")],
                relationships: vec![Relationship::new("RBI", "CONTROLS", "Repo Rate")],
            })
        }

        async fn extract_mentions(&self, _question: &str) -> Result<Vec<String>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn indexer(graph: Arc<KnowledgeGraph>, vectors: Arc<MemoryVectorIndex>) -> Indexer {
        Indexer::new(
            Arc::new(PlainTextExtractor),
            Arc::new(LengthEmbedder),
            vectors,
            graph,
            Arc::new(FixedExtractor),
            IndexerOptions {
                retry: RetryPolicy::none(),
                ..IndexerOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_ingest_populates_both_stores() {
        let graph = Arc::new(KnowledgeGraph::new());
        let vectors = Arc::new(MemoryVectorIndex::new());
        let indexer = indexer(graph.clone(), vectors.clone());

        let text = "RBI cut the repo rate.\u{000C}This page is broken.";
        let report = indexer.ingest_document("policy.txt", text.as_bytes()).await.unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.chunks, 2);
        assert_eq!(report.extraction_failures, 1);
        assert_eq!(vectors.len().await.unwrap(), 2);

        // Re-ingesting merges instead of duplicating
        indexer.ingest_document("policy.txt", text.as_bytes()).await.unwrap();
        let stats = indexer.get_stats().await.unwrap();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.graph.entity_count, 2);
        assert_eq!(stats.graph.relationship_count, 1);
    }

    /// Fails every call after the first `ok_calls`.
    struct FlakyEmbedder {
        calls: AtomicUsize,
        ok_calls: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
                return Err(ProviderError::failed(ProviderKind::Embedding, "connection reset"));
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    /// Records the peak number of extractions running at once.
    #[derive(Default)]
    struct PeakExtractor {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ExtractionProvider for PeakExtractor {
        async fn extract(&self, _text: &str) -> Result<ExtractionResult, ProviderError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(ExtractionResult::default())
        }

        async fn extract_mentions(&self, _question: &str) -> Result<Vec<String>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failed_embedding_writes_nothing() {
        let graph = Arc::new(KnowledgeGraph::new());
        let vectors = Arc::new(MemoryVectorIndex::new());
        let indexer = Indexer::new(
            Arc::new(PlainTextExtractor),
            Arc::new(FlakyEmbedder { calls: AtomicUsize::new(0), ok_calls: 1 }),
            vectors.clone(),
            graph.clone(),
            Arc::new(FixedExtractor),
            IndexerOptions {
                retry: RetryPolicy::none(),
                ..IndexerOptions::default()
            },
        );

        let text = "RBI cut the repo rate.\u{000C}Banks will follow.";
        let err = indexer.ingest_document("policy.txt", text.as_bytes()).await.unwrap_err();

        assert!(matches!(err, IndexError::Provider(ProviderError::Failed { .. })));
        assert_eq!(vectors.len().await.unwrap(), 0);
        assert_eq!(graph.stats().await.unwrap().entity_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_indexers_sharing_a_lock_do_not_interleave() {
        let graph: Arc<KnowledgeGraph> = Arc::new(KnowledgeGraph::new());
        let vectors: Arc<MemoryVectorIndex> = Arc::new(MemoryVectorIndex::new());
        let extractor = Arc::new(PeakExtractor::default());
        let lock = Arc::new(Mutex::new(()));

        let build = || {
            Indexer::new(
                Arc::new(PlainTextExtractor),
                Arc::new(LengthEmbedder),
                vectors.clone(),
                graph.clone(),
                extractor.clone(),
                IndexerOptions {
                    retry: RetryPolicy::none(),
                    ..IndexerOptions::default()
                },
            )
            .with_write_lock(lock.clone())
        };
        let (first, second) = (build(), build());

        let (a, b) = tokio::join!(
            first.ingest_document("a.txt", b"RBI cut the repo rate."),
            second.ingest_document("b.txt", b"SBI raised deposit rates."),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(extractor.peak.load(Ordering::SeqCst), 1);
        assert_eq!(vectors.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_document_is_reported() {
        let indexer = indexer(Arc::new(KnowledgeGraph::new()), Arc::new(MemoryVectorIndex::new()));
        let err = indexer.ingest_document("scan.pdf", b"%PDF-1.7").await.unwrap_err();
        assert!(matches!(err, IndexError::Ingestion(IngestionError::UnsupportedFormat(_))));
    }
}
